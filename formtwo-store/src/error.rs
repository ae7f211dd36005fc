//! Error types for formtwo-store

use std::path::PathBuf;
use thiserror::Error;

/// Day file store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Name is not a plain `<something>.json` file name
    #[error("Invalid day file name '{0}'")]
    InvalidFileName(String),

    /// Day file does not exist
    #[error("Day file not found: {0:?}")]
    NotFound(PathBuf),

    /// Day file exists but is not a valid document
    #[error("Failed to parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    /// Incoming answer cannot be merged
    #[error("Invalid answer: {0}")]
    InvalidAnswer(String),

    /// Read, write or rename failed
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document could not be rendered as JSON
    #[error("Failed to serialize day file: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
