//! Video error types.

use thiserror::Error;

/// Video-related errors.
#[derive(Error, Debug)]
pub enum VideoError {
    /// A stream failed to produce a frame.
    #[error("Decode failed: {0}")]
    Decode(String),

    /// A stream could not seek back to its start.
    #[error("Rewind failed: {0}")]
    Rewind(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The decode thread could not be started.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, VideoError>;
