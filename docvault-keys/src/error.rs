//! Key lifecycle error types.

use docvault_crypto::CryptoError;
use thiserror::Error;

/// Missing, corrupt or unusable key material.
///
/// Always surfaced to the caller; a default key is never substituted.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("no device key stored under this id")]
    Missing,

    #[error("stored key material is corrupt ({length} bytes, expected 32)")]
    Corrupt { length: usize },

    #[error("key manager not initialized")]
    NotInitialized,

    #[error("key store error: {0}")]
    Store(String),

    #[error("key rotation aborted: {0}")]
    Rotation(String),

    #[error("could not resolve staged key: {0}")]
    Recovery(String),

    #[error("wrong passphrase for key store")]
    WrongPassphrase,

    #[error("passphrase too short (min {minimum} characters)")]
    PassphraseTooShort { minimum: usize },

    #[error("key wrapping failed: {0}")]
    Wrap(#[from] CryptoError),
}

/// An operation raced a key rotation. Retry once the rotation completes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConcurrencyError {
    #[error("key rotation in progress")]
    RotationInProgress,
}

#[derive(Debug, Error)]
pub enum KeyManagerError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

pub type KeyResult<T> = Result<T, KeyError>;
pub type KeyManagerResult<T> = Result<T, KeyManagerError>;
