//! Encryption layer for DocVault.
//!
//! Provides data-at-rest encryption using:
//! - AES-256-CBC with PKCS#7 padding and a random 16-byte IV per call
//! - PBKDF2-HMAC-SHA256 for deriving backup keys from passwords
//! - Zeroization of all key material on drop
//!
//! # Wire formats
//!
//! Two byte layouts leave this crate and must stay bit-exact across
//! devices:
//!
//! 1. **Device frame**: `IV (16) || ciphertext`, produced by [`encrypt`]
//!    under the device-bound [`EncryptionKey`].
//!
//! 2. **Backup blob**: `salt (32) || IV (16) || ciphertext`, produced by
//!    [`export_blob`] under a [`DerivedKey`] that exists only for the call.
//!
//! Neither layout carries a length prefix, version tag or MAC.

mod cipher;
pub mod encryptor;
mod error;
pub mod export;
mod key;

pub use cipher::{IV_SIZE, MIN_FRAME_SIZE, decrypt, decrypt_detached, encrypt};
pub use encryptor::{DataEncryptor, EncryptorError, EncryptorResult, PassthroughEncryptor};
pub use error::{CryptoError, CryptoResult};
pub use export::{
    MIN_BLOB_SIZE, export_blob, export_blob_with_params, import_blob, import_blob_with_params,
};
pub use key::{
    DEFAULT_KDF_ITERATIONS, DerivedKey, EncryptionKey, KEY_SIZE, KdfParams, MIN_KDF_ITERATIONS,
    SALT_SIZE, Salt, derive_key,
};
