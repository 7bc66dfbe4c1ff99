//! # Error Types
//!
//! Custom error types for Fieldlink using `thiserror`.

use thiserror::Error;

/// Main error type for Fieldlink
#[derive(Debug, Error)]
pub enum FieldlinkError {
    /// Backing store could not be mounted, even after one reformat
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A single append or rewrite could not complete
    #[error("Write failure: {0}")]
    WriteFailure(String),

    /// A delivery attempt failed (timeout, transport error, rejected status)
    #[error("Send failure: {0}")]
    SendFailure(String),

    /// A record line could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// A reading carries values outside their physical range
    #[error("Invalid reading: {0}")]
    InvalidReading(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Fieldlink
pub type Result<T> = std::result::Result<T, FieldlinkError>;
