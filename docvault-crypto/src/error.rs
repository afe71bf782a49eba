//! Cryptographic error types.

use thiserror::Error;

/// Errors raised by the encryption engine, key derivation and the
/// export/import pipeline.
///
/// These are never retried: the same inputs cannot succeed on a second try.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKey { expected: usize, actual: usize },

    #[error("malformed frame: need at least {expected_min} bytes, got {actual}")]
    MalformedFrame { expected_min: usize, actual: usize },

    #[error("decryption failed (wrong key or corrupted data)")]
    DecryptionFailed,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("kdf iteration count {iterations} is below the minimum of {minimum}")]
    WeakKdfParams { iterations: u32, minimum: u32 },
}

pub type CryptoResult<T> = Result<T, CryptoError>;
