//! Key material and password-based key derivation.
//!
//! Two kinds of 256-bit keys exist:
//!
//! - [`EncryptionKey`]: the device-bound key, generated once and kept in a
//!   secure key store by the key manager.
//! - [`DerivedKey`]: an ephemeral key derived from a password and a salt for
//!   a single export or import. It is never persisted.
//!
//! Both are zeroized when dropped.

use crate::error::{CryptoError, CryptoResult};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of every symmetric key, in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// Size of a password-derivation salt, in bytes.
pub const SALT_SIZE: usize = 32;

/// Lowest PBKDF2 iteration count accepted anywhere in the workspace.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Iteration count used when nothing else is configured.
pub const DEFAULT_KDF_ITERATIONS: u32 = 600_000;

fn key_from_slice(bytes: &[u8]) -> CryptoResult<[u8; KEY_SIZE]> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })
}

/// The device-bound data encryption key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a fresh key from the operating system CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Builds a key from stored material, rejecting anything that is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        key_from_slice(bytes).map(Self::from_bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// A password-derived key, valid for one export or import call.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Salt for password-based key derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Generates a salt from the operating system CSPRNG.
    ///
    /// Salts are never derived from clocks or counters.
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Reads a salt from the head of a stored blob.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; SALT_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::KeyDerivation(format!(
                "salt must be {SALT_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// PBKDF2-HMAC-SHA256 parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfParams {
    pub iterations: u32,
}

impl KdfParams {
    /// Creates parameters, rejecting iteration counts below [`MIN_KDF_ITERATIONS`].
    pub fn new(iterations: u32) -> CryptoResult<Self> {
        let params = Self { iterations };
        params.validate()?;
        Ok(params)
    }

    /// The floor itself. Used by tests and low-power devices.
    pub fn minimum() -> Self {
        Self {
            iterations: MIN_KDF_ITERATIONS,
        }
    }

    pub fn validate(&self) -> CryptoResult<()> {
        if self.iterations < MIN_KDF_ITERATIONS {
            return Err(CryptoError::WeakKdfParams {
                iterations: self.iterations,
                minimum: MIN_KDF_ITERATIONS,
            });
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

/// Derives a 32-byte key from `password`.
///
/// When `salt` is `None` a fresh CSPRNG salt is generated. The salt that was
/// used is returned alongside the key so it can be stored next to the
/// ciphertext; the same password and salt always yield the same key.
pub fn derive_key(
    password: &str,
    salt: Option<&Salt>,
    params: &KdfParams,
) -> CryptoResult<(DerivedKey, Salt)> {
    params.validate()?;

    let salt = salt.copied().unwrap_or_else(Salt::random);
    let mut bytes = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        salt.as_bytes(),
        params.iterations,
        &mut bytes,
    );

    Ok((DerivedKey { bytes }, salt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_password_and_salt_derive_same_key() {
        let salt = Salt::random();
        let params = KdfParams::minimum();

        let (a, salt_a) = derive_key("pw", Some(&salt), &params).unwrap();
        let (b, salt_b) = derive_key("pw", Some(&salt), &params).unwrap();

        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(salt_a, salt);
        assert_eq!(salt_b, salt);
    }

    #[test]
    fn omitted_salt_is_fresh_each_call() {
        let params = KdfParams::minimum();
        let (a, salt_a) = derive_key("pw", None, &params).unwrap();
        let (b, salt_b) = derive_key("pw", None, &params).unwrap();

        assert_ne!(salt_a, salt_b);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_passwords_differ() {
        let salt = Salt::random();
        let params = KdfParams::minimum();
        let (a, _) = derive_key("pw1", Some(&salt), &params).unwrap();
        let (b, _) = derive_key("pw2", Some(&salt), &params).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn iterations_below_floor_rejected() {
        let err = KdfParams::new(99_999).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::WeakKdfParams {
                iterations: 99_999,
                minimum: MIN_KDF_ITERATIONS
            }
        ));

        let weak = KdfParams { iterations: 1 };
        assert!(derive_key("pw", None, &weak).is_err());
    }

    #[test]
    fn encryption_key_from_slice_checks_length() {
        assert!(EncryptionKey::from_slice(&[0u8; 31]).is_err());
        assert!(EncryptionKey::from_slice(&[0u8; 33]).is_err());
        assert!(EncryptionKey::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn generated_keys_are_distinct() {
        let a = EncryptionKey::generate();
        let b = EncryptionKey::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn debug_output_is_redacted() {
        let key = EncryptionKey::from_bytes([0xAB; KEY_SIZE]);
        let shown = format!("{key:?}");
        assert!(!shown.contains("171"));
        assert!(shown.contains("REDACTED"));
    }
}
