use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZvezdaError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("door '{door}' is cooling down, retry in {}ms", remaining.as_millis())]
    TooEarly { door: String, remaining: Duration },

    #[error("unknown door: {0}")]
    UnknownDoor(String),

    #[error("hardware fault on door '{door}': {reason}")]
    HardwareFault { door: String, reason: String },

    #[error("door '{0}' has been released for shutdown")]
    ShuttingDown(String),

    #[error("too many logins in progress, try again shortly")]
    Overloaded,

    #[error("invalid door configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid door timing: {0}")]
    InvalidTiming(String),

    #[error("user already exists: {0}")]
    UserExists(String),

    #[error("invalid username '{0}': must be non-empty and must not contain ':' or whitespace")]
    InvalidUsername(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("password must be at least {min} characters long")]
    PasswordTooShort { min: usize },

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("credential database error: {0}")]
    CredentialDb(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ZvezdaError>;
