pub mod serve;
pub mod user;
