//! Errors raised by the core formats and the transform stack.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or truncated point-cloud data.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Transform stack overflow (max depth {max_depth})")]
    StackOverflow { max_depth: usize },

    /// Popping the root transform.
    #[error("Transform stack underflow")]
    StackUnderflow,
}

pub type Result<T> = std::result::Result<T, Error>;
