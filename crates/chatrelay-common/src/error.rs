//! Error types for chatrelay

use thiserror::Error;

/// Main error type for chatrelay
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Push gateway error: {0}")]
    Push(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for chatrelay
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether retrying the failed operation later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Io(_) | Error::Storage(_) | Error::Smtp(_) | Error::Push(_) => true,
            Error::Config(_)
            | Error::Json(_)
            | Error::Protocol(_)
            | Error::Validation(_)
            | Error::Other(_) => false,
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Smtp(_) => "SMTP_ERROR",
            Error::Protocol(_) => "PROTOCOL_ERROR",
            Error::Push(_) => "PUSH_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
