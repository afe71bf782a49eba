//! Storage error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("document not found: {0}/{1}")]
    NotFound(String, String),

    #[error("encryption error: {0}")]
    Encryption(#[from] docvault_crypto::EncryptorError),

    #[error("crypto error: {0}")]
    Crypto(#[from] docvault_crypto::CryptoError),

    #[error("lock poisoned: {0}")]
    Poisoned(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
