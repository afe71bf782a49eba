//! Blob transport error types.

use thiserror::Error;

/// Result type for transport operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors that can occur while moving backup blobs.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("S3 operation failed: {0}")]
    S3(String),

    #[error("remote blob not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
