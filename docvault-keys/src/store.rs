//! Secure key store seam.
//!
//! The key manager only needs opaque get/set/delete by id. Platform
//! keychains plug in behind [`SecureKeyStore`]; this crate ships an
//! in-memory store, a DuckDB-backed one, and [`PassphraseKeyStore`], which
//! wraps either so that material is only ever written encrypted.

use crate::error::{KeyError, KeyResult};
use chrono::Utc;
use docvault_crypto::{EncryptionKey, KdfParams, Salt, derive_key};
use docvault_storage::SharedConnection;
use duckdb::{Connection, params};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Opaque storage for raw key bytes.
pub trait SecureKeyStore: Send + Sync {
    fn get(&self, id: &str) -> KeyResult<Option<Zeroizing<Vec<u8>>>>;

    fn set(&self, id: &str, material: &[u8]) -> KeyResult<()>;

    /// Deleting an id that does not exist is not an error.
    fn delete(&self, id: &str) -> KeyResult<()>;
}

/// Process-local key store. Keys vanish with the process.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> KeyResult<MutexGuard<'_, HashMap<String, Zeroizing<Vec<u8>>>>> {
        self.keys.lock().map_err(|e| KeyError::Store(e.to_string()))
    }
}

impl SecureKeyStore for MemoryKeyStore {
    fn get(&self, id: &str) -> KeyResult<Option<Zeroizing<Vec<u8>>>> {
        Ok(self.lock()?.get(id).cloned())
    }

    fn set(&self, id: &str, material: &[u8]) -> KeyResult<()> {
        self.lock()?
            .insert(id.to_string(), Zeroizing::new(material.to_vec()));
        Ok(())
    }

    fn delete(&self, id: &str) -> KeyResult<()> {
        self.lock()?.remove(id);
        Ok(())
    }
}

/// Key store kept in a table of the vault database.
///
/// Material is stored exactly as given. Anything that shares a file with
/// the data it protects must go through [`PassphraseKeyStore`].
pub struct DuckDbKeyStore {
    conn: SharedConnection,
}

impl DuckDbKeyStore {
    pub fn open_with_conn(conn: SharedConnection) -> KeyResult<Self> {
        let store = Self { conn };
        store.ensure_tables()?;
        Ok(store)
    }

    fn lock(&self) -> KeyResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| KeyError::Store(e.to_string()))
    }

    fn ensure_tables(&self) -> KeyResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS secure_keys (
                key_id VARCHAR PRIMARY KEY,
                material BLOB NOT NULL,
                updated_at BIGINT NOT NULL
            );",
        )
        .map_err(store_err)?;
        Ok(())
    }
}

fn store_err(e: duckdb::Error) -> KeyError {
    KeyError::Store(e.to_string())
}

impl SecureKeyStore for DuckDbKeyStore {
    fn get(&self, id: &str) -> KeyResult<Option<Zeroizing<Vec<u8>>>> {
        let conn = self.lock()?;
        match conn.query_row(
            "SELECT material FROM secure_keys WHERE key_id = ?",
            params![id],
            |row| row.get::<_, Vec<u8>>(0),
        ) {
            Ok(bytes) => Ok(Some(Zeroizing::new(bytes))),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    fn set(&self, id: &str, material: &[u8]) -> KeyResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO secure_keys (key_id, material, updated_at) VALUES (?, ?, ?)",
            params![id, material, Utc::now().timestamp_millis()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn delete(&self, id: &str) -> KeyResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM secure_keys WHERE key_id = ?", params![id])
            .map_err(store_err)?;
        Ok(())
    }
}

const KEK_SALT_ID: &str = "docvault.kek.salt";
const KEK_CHECK_ID: &str = "docvault.kek.check";
const KEK_CHECK_PLAINTEXT: &[u8] = b"docvault-key-store-check-v1";

/// Shortest passphrase accepted when a wrapped store is first set up.
pub const MIN_PASSPHRASE_LEN: usize = 8;

/// Encrypts key material under a passphrase-derived key before it reaches
/// the inner store.
///
/// The wrapping key is derived with PBKDF2 from the passphrase and a salt
/// kept in the inner store. A check frame stored beside the salt lets
/// [`unlock`](Self::unlock) reject a wrong passphrase instead of handing
/// out garbage keys. Neither the salt nor the check frame is secret.
pub struct PassphraseKeyStore {
    inner: Arc<dyn SecureKeyStore>,
    kek: EncryptionKey,
}

impl PassphraseKeyStore {
    /// Unlocks `inner` with `passphrase`, setting it up on first use.
    pub fn unlock(
        inner: Arc<dyn SecureKeyStore>,
        passphrase: &str,
        params: &KdfParams,
    ) -> KeyResult<Self> {
        let Some(salt) = inner.get(KEK_SALT_ID)? else {
            return Self::setup(inner, passphrase, params);
        };

        let kek = derive_kek(passphrase, &Salt::from_slice(salt.as_slice())?, params)?;
        let check = inner
            .get(KEK_CHECK_ID)?
            .ok_or_else(|| KeyError::Store("passphrase check frame missing".into()))?;
        match docvault_crypto::decrypt(kek.as_bytes(), &check) {
            Ok(plain) if plain == KEK_CHECK_PLAINTEXT => {}
            _ => return Err(KeyError::WrongPassphrase),
        }

        debug!("unlocked passphrase key store");
        Ok(Self { inner, kek })
    }

    fn setup(inner: Arc<dyn SecureKeyStore>, passphrase: &str, params: &KdfParams) -> KeyResult<Self> {
        if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
            return Err(KeyError::PassphraseTooShort {
                minimum: MIN_PASSPHRASE_LEN,
            });
        }

        let salt = Salt::random();
        let kek = derive_kek(passphrase, &salt, params)?;
        let check = docvault_crypto::encrypt(kek.as_bytes(), KEK_CHECK_PLAINTEXT)?;
        // The salt marks setup as complete, so it goes in last.
        inner.set(KEK_CHECK_ID, &check)?;
        inner.set(KEK_SALT_ID, salt.as_bytes())?;

        info!("initialized passphrase key store");
        Ok(Self { inner, kek })
    }
}

fn derive_kek(passphrase: &str, salt: &Salt, params: &KdfParams) -> KeyResult<EncryptionKey> {
    let (derived, _) = derive_key(passphrase, Some(salt), params)?;
    Ok(EncryptionKey::from_slice(derived.as_bytes())?)
}

impl SecureKeyStore for PassphraseKeyStore {
    fn get(&self, id: &str) -> KeyResult<Option<Zeroizing<Vec<u8>>>> {
        match self.inner.get(id)? {
            Some(frame) => {
                let material = docvault_crypto::decrypt(self.kek.as_bytes(), &frame)?;
                Ok(Some(Zeroizing::new(material)))
            }
            None => Ok(None),
        }
    }

    fn set(&self, id: &str, material: &[u8]) -> KeyResult<()> {
        let frame = docvault_crypto::encrypt(self.kek.as_bytes(), material)?;
        self.inner.set(id, &frame)
    }

    fn delete(&self, id: &str) -> KeyResult<()> {
        self.inner.delete(id)
    }
}
