//! Error types for formtwo-upload
//!
//! `UploadError` belongs to one document and never stops a batch.
//! `PipelineError` stops the whole operation before any request is sent.

use std::time::Duration;
use thiserror::Error;

/// Failure uploading a single document
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    /// Collector answered 500; `details` holds the response body
    #[error("Internal server error while processing {file_name}. Please contact technical support.")]
    ServerError { file_name: String, details: String },

    /// Any other non-2xx status
    #[error("HTTP error! status: {status}")]
    Http { status: u16 },

    /// Request aborted after the per-document timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-level failure (DNS, refused connection, reset)
    #[error("Network error: {0}")]
    Network(String),

    /// 2xx response whose body is not JSON
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The upload task panicked
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    /// Collector URL cannot be used
    #[error("Invalid collector URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

/// Failure of a pipeline operation as a whole
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Listing or reading the survey directory failed
    #[error("Error reading files: {0}")]
    Discovery(String),

    #[error("Selection index {index} out of range ({len} documents)")]
    IndexOutOfRange { index: usize, len: usize },

    /// Submit requested with no document selected
    #[error("Please select at least one survey.")]
    NothingSelected,

    /// Pre-flight connectivity check failed
    #[error("No internet connection. Please check your connection and try again.")]
    Offline,
}
