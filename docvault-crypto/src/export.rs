//! Portable, password-protected backup blobs.
//!
//! Blob layout: `salt (32 bytes) || IV (16 bytes) || ciphertext`.
//!
//! The layout has no version byte and no authentication tag, so it stays
//! readable by every device that already holds backups in this format. The
//! consequence is that a wrong password is not always detected: most of the
//! time the padding check fails with [`CryptoError::DecryptionFailed`], but
//! occasionally garbage plaintext is returned instead.

use crate::cipher::{self, IV_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{KdfParams, SALT_SIZE, Salt, derive_key};
use tracing::debug;

/// Smallest blob `import_blob` will look at.
pub const MIN_BLOB_SIZE: usize = SALT_SIZE + IV_SIZE;

/// Encrypts `plaintext` under a key derived from `password` and a fresh salt.
pub fn export_blob(plaintext: &[u8], password: &str) -> CryptoResult<Vec<u8>> {
    export_blob_with_params(plaintext, password, &KdfParams::default())
}

/// [`export_blob`] with explicit KDF parameters.
pub fn export_blob_with_params(
    plaintext: &[u8],
    password: &str,
    params: &KdfParams,
) -> CryptoResult<Vec<u8>> {
    let (key, salt) = derive_key(password, None, params)?;
    let frame = cipher::encrypt(key.as_bytes(), plaintext)?;

    let mut blob = Vec::with_capacity(SALT_SIZE + frame.len());
    blob.extend_from_slice(salt.as_bytes());
    blob.extend_from_slice(&frame);

    debug!("exported {} plaintext bytes into {} byte blob", plaintext.len(), blob.len());
    Ok(blob)
}

/// Reverses [`export_blob`], re-deriving the key from the embedded salt.
pub fn import_blob(blob: &[u8], password: &str) -> CryptoResult<Vec<u8>> {
    import_blob_with_params(blob, password, &KdfParams::default())
}

/// [`import_blob`] with explicit KDF parameters. They must match the export.
pub fn import_blob_with_params(
    blob: &[u8],
    password: &str,
    params: &KdfParams,
) -> CryptoResult<Vec<u8>> {
    if blob.len() < MIN_BLOB_SIZE {
        return Err(CryptoError::MalformedFrame {
            expected_min: MIN_BLOB_SIZE,
            actual: blob.len(),
        });
    }

    let (salt_bytes, frame) = blob.split_at(SALT_SIZE);
    let salt = Salt::from_slice(salt_bytes)?;
    let (key, _) = derive_key(password, Some(&salt), params)?;
    cipher::decrypt(key.as_bytes(), frame)
}
