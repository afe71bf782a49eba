//! AES-256-CBC frame encryption.
//!
//! Frame layout: `IV (16 bytes) || ciphertext`. The ciphertext is PKCS#7
//! padded, so it is always a non-empty multiple of the block size. There is
//! no authentication tag; integrity of the plaintext is not guaranteed.

use crate::error::{CryptoError, CryptoResult};
use crate::key::KEY_SIZE;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rand::rngs::OsRng;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Size of the initialization vector prefixed to every frame.
pub const IV_SIZE: usize = 16;

/// Smallest frame `decrypt` will look at.
pub const MIN_FRAME_SIZE: usize = IV_SIZE;

fn check_key(key: &[u8]) -> CryptoResult<()> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKey {
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }
    Ok(())
}

/// Encrypts `plaintext` under `key` with a fresh random IV.
///
/// Returns `IV || ciphertext`. Two calls with the same key and plaintext
/// produce different frames.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    check_key(key)?;

    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(key, &iv).map_err(|_| CryptoError::InvalidKey {
        expected: KEY_SIZE,
        actual: key.len(),
    })?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut frame = Vec::with_capacity(IV_SIZE + ciphertext.len());
    frame.extend_from_slice(&iv);
    frame.extend_from_slice(&ciphertext);
    Ok(frame)
}

/// Decrypts an `IV || ciphertext` frame produced by [`encrypt`].
pub fn decrypt(key: &[u8], frame: &[u8]) -> CryptoResult<Vec<u8>> {
    check_key(key)?;
    if frame.len() < MIN_FRAME_SIZE {
        return Err(CryptoError::MalformedFrame {
            expected_min: MIN_FRAME_SIZE,
            actual: frame.len(),
        });
    }

    let (iv, ciphertext) = frame.split_at(IV_SIZE);
    decrypt_detached(key, iv, ciphertext)
}

/// Decrypts ciphertext whose IV was stored separately.
///
/// Only for reading the older layout that did not prefix the IV; new data
/// always goes through [`encrypt`] / [`decrypt`].
pub fn decrypt_detached(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    check_key(key)?;
    if iv.len() != IV_SIZE {
        return Err(CryptoError::MalformedFrame {
            expected_min: IV_SIZE,
            actual: iv.len(),
        });
    }

    let cipher = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidKey {
        expected: KEY_SIZE,
        actual: key.len(),
    })?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}
