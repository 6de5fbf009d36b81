//! Session Error Types

use thiserror::Error;

/// Errors surfaced by the session coordinator
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid key: {0} is reserved")]
    InvalidKey(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl From<SessionError> for String {
    fn from(err: SessionError) -> String {
        err.to_string()
    }
}

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;
