pub mod auth;
pub mod config;
pub mod credentials;
pub mod door;
pub mod error;
pub mod gpio;
pub mod password;
pub mod registry;

pub use auth::{AuthGate, Identity};
pub use door::{DoorController, DoorState, DoorStatus};
pub use error::{Result, ZvezdaError};
pub use registry::ActuationRegistry;
