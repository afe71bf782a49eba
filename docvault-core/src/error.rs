//! Error type for the security core.

use docvault_audit::AuditError;
use docvault_cloud::CloudError;
use docvault_crypto::{CryptoError, EncryptorError};
use docvault_keys::{KeyError, KeyManagerError};
use docvault_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("key manager error: {0}")]
    KeyManager(#[from] KeyManagerError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("transport error: {0}")]
    Cloud(#[from] CloudError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no backup transport configured")]
    NoTransport,
}

impl CoreError {
    /// The operation raced a key rotation and can be retried once it completes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::KeyManager(KeyManagerError::Concurrency(_))
                | CoreError::Storage(StorageError::Encryption(EncryptorError::Busy))
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
