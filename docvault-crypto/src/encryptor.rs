//! The seam through which stores reach the device key.
//!
//! Consumers (the document store) depend on `Arc<dyn DataEncryptor>` and
//! never see raw keys. `KeyManager` implements this trait; tests use
//! `PassthroughEncryptor` to store bytes unchanged.

use thiserror::Error;

/// Why a store could not encrypt or decrypt.
#[derive(Debug, Error)]
pub enum EncryptorError {
    /// No key is loaded (not initialized, shut down, or cleared).
    #[error("encryptor unavailable (no active key)")]
    Unavailable,
    /// A key rotation holds the key; retry once it completes.
    #[error("key rotation in progress")]
    Busy,
    #[error("crypto error: {0}")]
    Crypto(#[from] crate::CryptoError),
}

pub type EncryptorResult<T> = Result<T, EncryptorError>;

/// Encrypts and decrypts opaque byte slices under a key the caller never sees.
pub trait DataEncryptor: Send + Sync {
    /// Encrypt `data`, returning a device-key frame.
    fn encrypt_bytes(&self, data: &[u8]) -> EncryptorResult<Vec<u8>>;

    /// Decrypt a frame previously produced by `encrypt_bytes`.
    fn decrypt_bytes(&self, data: &[u8]) -> EncryptorResult<Vec<u8>>;
}

/// Stores bytes unchanged. Only for tests and tooling.
pub struct PassthroughEncryptor;

impl DataEncryptor for PassthroughEncryptor {
    fn encrypt_bytes(&self, data: &[u8]) -> EncryptorResult<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decrypt_bytes(&self, data: &[u8]) -> EncryptorResult<Vec<u8>> {
        Ok(data.to_vec())
    }
}
