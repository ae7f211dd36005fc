//! Common error types for FormTwo

use thiserror::Error;

/// Common result type for FormTwo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the store and the upload pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
