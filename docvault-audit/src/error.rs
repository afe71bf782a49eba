//! Audit error types.
//!
//! Chain tampering is not an error: verification returns it as data
//! (see [`crate::ChainIssue`]).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("audit service not initialized")]
    NotInitialized,

    #[error("unknown audit level: {0}")]
    UnknownLevel(String),

    #[error("unknown audit action: {0}")]
    UnknownAction(String),
}

impl From<duckdb::Error> for AuditError {
    fn from(e: duckdb::Error) -> Self {
        AuditError::Storage(e.to_string())
    }
}

pub type AuditResult<T> = Result<T, AuditError>;
