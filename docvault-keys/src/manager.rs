//! Device key lifecycle.
//!
//! `KeyManager` loads (or creates) the device key from a [`SecureKeyStore`]
//! and performs every device-key encrypt/decrypt. Callers never see the key.
//!
//! Encrypt/decrypt take a shared lock on the active key. Rotation and
//! clearing take the exclusive lock, so no operation ever observes a
//! half-rotated key. An operation that arrives while a rotation holds the
//! lock fails fast with [`ConcurrencyError::RotationInProgress`].
//!
//! A rotation stages the new key under [`KeyManager::staged_key_id`] before
//! any data moves and commits it afterwards. If the process stops in
//! between, [`KeyManager::init_checked`] decides on the next start which of
//! the two keys the data is actually under.

use crate::error::{ConcurrencyError, KeyError, KeyManagerError, KeyManagerResult, KeyResult};
use crate::store::SecureKeyStore;
use docvault_crypto::{DataEncryptor, EncryptionKey, EncryptorError, EncryptorResult, KEY_SIZE};
use std::fmt::Display;
use std::sync::{Arc, RwLock, RwLockReadGuard, TryLockError};
use tracing::{debug, info, warn};

/// Key id used when none is configured.
pub const DEFAULT_KEY_ID: &str = "docvault.device-key";

/// Answers whether a key opens the stored data; `None` when nothing is stored.
type DataCheck<'a> = &'a dyn Fn(&EncryptionKey) -> KeyResult<Option<bool>>;

struct ActiveKey {
    key: EncryptionKey,
    version: u64,
    /// Data is under this key but the store still only has it staged.
    uncommitted: bool,
}

pub struct KeyManager {
    store: Arc<dyn SecureKeyStore>,
    key_id: String,
    active: RwLock<Option<ActiveKey>>,
}

impl KeyManager {
    pub fn new(store: Arc<dyn SecureKeyStore>, key_id: impl Into<String>) -> Self {
        Self {
            store,
            key_id: key_id.into(),
            active: RwLock::new(None),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Id under which a new key is staged while a rotation is in flight.
    pub fn staged_key_id(&self) -> String {
        format!("{}.pending", self.key_id)
    }

    /// Loads the device key, generating and persisting one on first use.
    ///
    /// A key staged by an interrupted rotation is left in place and the
    /// committed key is used; see [`init_checked`](Self::init_checked).
    pub fn init(&self) -> KeyResult<()> {
        self.load(true, None)
    }

    /// Like [`init`](Self::init), but settles an interrupted rotation first.
    ///
    /// `opens_data` reports whether a key decrypts the stored data (`None`
    /// if nothing is stored). A staged key that opens the data is promoted
    /// to the committed key; otherwise it is discarded.
    pub fn init_checked<F, E>(&self, opens_data: F) -> KeyResult<()>
    where
        F: Fn(&EncryptionKey) -> Result<Option<bool>, E>,
        E: Display,
    {
        let check = |key: &EncryptionKey| {
            opens_data(key).map_err(|e| KeyError::Recovery(e.to_string()))
        };
        self.load(true, Some(&check))
    }

    /// Loads the device key, failing with [`KeyError::Missing`] if none is stored.
    pub fn unlock_existing(&self) -> KeyResult<()> {
        self.load(false, None)
    }

    fn load(&self, generate_if_missing: bool, check: Option<DataCheck<'_>>) -> KeyResult<()> {
        let mut guard = self
            .active
            .write()
            .map_err(|e| KeyError::Store(e.to_string()))?;
        if guard.is_some() {
            return Ok(());
        }

        if let Some(key) = self.resolve_staged(check)? {
            *guard = Some(ActiveKey {
                key,
                version: 1,
                uncommitted: false,
            });
            return Ok(());
        }

        let key = match self.store.get(&self.key_id)? {
            Some(material) => {
                if material.len() != KEY_SIZE {
                    return Err(KeyError::Corrupt {
                        length: material.len(),
                    });
                }
                let key = EncryptionKey::from_slice(&material).map_err(|_| KeyError::Corrupt {
                    length: material.len(),
                })?;
                debug!(key_id = %self.key_id, "loaded device key");
                key
            }
            None if generate_if_missing => {
                let key = EncryptionKey::generate();
                self.store.set(&self.key_id, key.as_bytes())?;
                info!(key_id = %self.key_id, "generated new device key");
                key
            }
            None => return Err(KeyError::Missing),
        };

        *guard = Some(ActiveKey {
            key,
            version: 1,
            uncommitted: false,
        });
        Ok(())
    }

    /// Promotes or discards a key left staged by an interrupted rotation.
    ///
    /// Returns the promoted key, now committed.
    fn resolve_staged(&self, check: Option<DataCheck<'_>>) -> KeyResult<Option<EncryptionKey>> {
        let staged_id = self.staged_key_id();
        let Some(material) = self.store.get(&staged_id)? else {
            return Ok(None);
        };
        let Some(check) = check else {
            warn!(
                key_id = %self.key_id,
                "found a staged key from an interrupted rotation; keeping the committed key"
            );
            return Ok(None);
        };

        let staged = match EncryptionKey::from_slice(&material) {
            Ok(key) => key,
            Err(_) => {
                warn!(key_id = %self.key_id, length = material.len(), "discarding corrupt staged key");
                self.store.delete(&staged_id)?;
                return Ok(None);
            }
        };

        if check(&staged)? == Some(true) {
            self.commit(&staged)?;
            info!(key_id = %self.key_id, "promoted key staged by an interrupted rotation");
            Ok(Some(staged))
        } else {
            self.store.delete(&staged_id)?;
            info!(key_id = %self.key_id, "discarded key staged by an interrupted rotation");
            Ok(None)
        }
    }

    /// Makes `key` the stored device key and drops the staged copy.
    fn commit(&self, key: &EncryptionKey) -> KeyResult<()> {
        self.store.set(&self.key_id, key.as_bytes())?;
        self.store.delete(&self.staged_key_id())
    }

    /// Drops the in-memory key. The stored key is untouched.
    pub fn shutdown(&self) {
        match self.active.write() {
            Ok(mut guard) => {
                *guard = None;
            }
            Err(poisoned) => {
                *poisoned.into_inner() = None;
            }
        }
        debug!(key_id = %self.key_id, "key manager shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.active
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Rotation counter of the active key, starting at 1 after load.
    pub fn key_version(&self) -> Option<u64> {
        self.active
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|active| active.version))
    }

    fn read_active(&self) -> KeyManagerResult<RwLockReadGuard<'_, Option<ActiveKey>>> {
        match self.active.try_read() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(ConcurrencyError::RotationInProgress.into()),
            Err(TryLockError::Poisoned(e)) => Err(KeyError::Store(e.to_string()).into()),
        }
    }

    /// Encrypts `plaintext` into a device frame (`IV || ciphertext`).
    pub fn encrypt(&self, plaintext: &[u8]) -> KeyManagerResult<Vec<u8>> {
        let guard = self.read_active()?;
        let active = guard.as_ref().ok_or(KeyError::NotInitialized)?;
        Ok(docvault_crypto::encrypt(active.key.as_bytes(), plaintext)?)
    }

    /// Decrypts a device frame.
    pub fn decrypt(&self, frame: &[u8]) -> KeyManagerResult<Vec<u8>> {
        let guard = self.read_active()?;
        let active = guard.as_ref().ok_or(KeyError::NotInitialized)?;
        Ok(docvault_crypto::decrypt(active.key.as_bytes(), frame)?)
    }

    /// Replaces the device key.
    ///
    /// `reencrypt` receives the old and new key and must move every piece
    /// of data encrypted under the old key. It runs under the exclusive
    /// lock. The new key is staged in the store before `reencrypt` runs and
    /// only committed afterwards; if `reencrypt` fails the old key stays
    /// active and the staged key is discarded.
    ///
    /// Once `reencrypt` succeeds the data is under the new key, so the new
    /// key becomes active even if committing it to the store fails. It then
    /// stays staged: the next rotation commits it first, and
    /// [`init_checked`](Self::init_checked) promotes it after a restart.
    ///
    /// Returns the new key version.
    pub fn change_key<F, E>(&self, reencrypt: F) -> KeyManagerResult<u64>
    where
        F: FnOnce(&EncryptionKey, &EncryptionKey) -> Result<(), E>,
        E: Display,
    {
        let mut guard = self
            .active
            .write()
            .map_err(|e| KeyError::Store(e.to_string()))?;
        let current = guard.as_mut().ok_or(KeyError::NotInitialized)?;

        if current.uncommitted {
            self.commit(&current.key)?;
            current.uncommitted = false;
        }

        let new_key = EncryptionKey::generate();
        let staged_id = self.staged_key_id();
        self.store.set(&staged_id, new_key.as_bytes())?;

        if let Err(e) = reencrypt(&current.key, &new_key) {
            if let Err(cleanup) = self.store.delete(&staged_id) {
                warn!(key_id = %self.key_id, "failed to discard staged key: {cleanup}");
            }
            return Err(KeyError::Rotation(e.to_string()).into());
        }

        let version = current.version + 1;
        let uncommitted = match self.commit(&new_key) {
            Ok(()) => false,
            Err(e) => {
                warn!(
                    key_id = %self.key_id,
                    version,
                    "data moved to the new key but committing it failed; it stays staged: {e}"
                );
                true
            }
        };

        *guard = Some(ActiveKey {
            key: new_key,
            version,
            uncommitted,
        });
        info!(key_id = %self.key_id, version, "device key rotated");
        Ok(version)
    }

    /// Destroys the device key in memory and in the store.
    ///
    /// Anything still encrypted under it becomes unreadable.
    pub fn clear_key(&self) -> KeyResult<()> {
        let mut guard = self
            .active
            .write()
            .map_err(|e| KeyError::Store(e.to_string()))?;
        self.store.delete(&self.key_id)?;
        self.store.delete(&self.staged_key_id())?;
        *guard = None;
        info!(key_id = %self.key_id, "device key cleared");
        Ok(())
    }
}

impl DataEncryptor for KeyManager {
    fn encrypt_bytes(&self, data: &[u8]) -> EncryptorResult<Vec<u8>> {
        self.encrypt(data).map_err(to_encryptor_error)
    }

    fn decrypt_bytes(&self, data: &[u8]) -> EncryptorResult<Vec<u8>> {
        self.decrypt(data).map_err(to_encryptor_error)
    }
}

fn to_encryptor_error(e: KeyManagerError) -> EncryptorError {
    match e {
        KeyManagerError::Crypto(c) => EncryptorError::Crypto(c),
        KeyManagerError::Concurrency(_) => EncryptorError::Busy,
        KeyManagerError::Key(_) => EncryptorError::Unavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKeyStore;
    use std::sync::mpsc;
    use std::thread;

    fn manager() -> (Arc<MemoryKeyStore>, KeyManager) {
        let store = Arc::new(MemoryKeyStore::new());
        let manager = KeyManager::new(store.clone(), DEFAULT_KEY_ID);
        (store, manager)
    }

    #[test]
    fn init_generates_and_persists_once() {
        let (store, manager) = manager();
        manager.init().unwrap();
        let first = store.get(DEFAULT_KEY_ID).unwrap().unwrap();
        assert_eq!(first.len(), KEY_SIZE);

        manager.init().unwrap();
        assert_eq!(store.get(DEFAULT_KEY_ID).unwrap().unwrap(), first);
        assert_eq!(manager.key_version(), Some(1));
    }

    #[test]
    fn second_manager_loads_same_key() {
        let (store, manager) = manager();
        manager.init().unwrap();
        let frame = manager.encrypt(b"hello").unwrap();

        let other = KeyManager::new(store, DEFAULT_KEY_ID);
        other.unlock_existing().unwrap();
        assert_eq!(other.decrypt(&frame).unwrap(), b"hello");
    }

    #[test]
    fn unlock_existing_without_key_is_missing() {
        let (_, manager) = manager();
        assert!(matches!(manager.unlock_existing(), Err(KeyError::Missing)));
    }

    #[test]
    fn corrupt_key_is_reported_not_replaced() {
        let (store, manager) = manager();
        store.set(DEFAULT_KEY_ID, &[9u8; 12]).unwrap();
        assert!(matches!(manager.init(), Err(KeyError::Corrupt { length: 12 })));
        assert_eq!(store.get(DEFAULT_KEY_ID).unwrap().unwrap().as_slice(), &[9u8; 12]);
    }

    #[test]
    fn operations_before_init_fail() {
        let (_, manager) = manager();
        assert!(matches!(
            manager.encrypt(b"x"),
            Err(KeyManagerError::Key(KeyError::NotInitialized))
        ));
        assert!(!manager.is_initialized());
    }

    #[test]
    fn shutdown_drops_in_memory_key_only() {
        let (store, manager) = manager();
        manager.init().unwrap();
        manager.shutdown();
        assert!(!manager.is_initialized());
        assert!(store.get(DEFAULT_KEY_ID).unwrap().is_some());
    }

    #[test]
    fn change_key_reencrypts_and_bumps_version() {
        let (store, manager) = manager();
        manager.init().unwrap();
        let frame = manager.encrypt(b"document").unwrap();

        let mut rewritten = Vec::new();
        let version = manager
            .change_key(|old, new| -> Result<(), docvault_crypto::CryptoError> {
                let plain = docvault_crypto::decrypt(old.as_bytes(), &frame)?;
                rewritten = docvault_crypto::encrypt(new.as_bytes(), &plain)?;
                Ok(())
            })
            .unwrap();

        assert_eq!(version, 2);
        assert_eq!(manager.key_version(), Some(2));
        assert_eq!(manager.decrypt(&rewritten).unwrap(), b"document");
        assert!(store.get(&manager.staged_key_id()).unwrap().is_none());

        // The committed key is the new one.
        let reloaded = KeyManager::new(store, DEFAULT_KEY_ID);
        reloaded.unlock_existing().unwrap();
        assert_eq!(reloaded.decrypt(&rewritten).unwrap(), b"document");
    }

    #[test]
    fn failed_reencrypt_keeps_old_key() {
        let (store, manager) = manager();
        manager.init().unwrap();
        let before = store.get(DEFAULT_KEY_ID).unwrap().unwrap();
        let frame = manager.encrypt(b"keep me").unwrap();

        let err = manager
            .change_key(|_, _| Err::<(), _>("disk full"))
            .unwrap_err();
        assert!(matches!(err, KeyManagerError::Key(KeyError::Rotation(ref m)) if m == "disk full"));

        assert_eq!(manager.key_version(), Some(1));
        assert_eq!(store.get(DEFAULT_KEY_ID).unwrap().unwrap(), before);
        assert!(store.get(&manager.staged_key_id()).unwrap().is_none());
        assert_eq!(manager.decrypt(&frame).unwrap(), b"keep me");
    }

    #[test]
    fn operations_during_rotation_report_concurrency_error() {
        let (_, manager) = manager();
        manager.init().unwrap();
        let manager = Arc::new(manager);

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let rotating = {
            let manager = manager.clone();
            thread::spawn(move || {
                manager
                    .change_key(|_, _| -> Result<(), String> {
                        entered_tx.send(()).map_err(|e| e.to_string())?;
                        release_rx.recv().map_err(|e| e.to_string())?;
                        Ok(())
                    })
                    .unwrap()
            })
        };

        entered_rx.recv().unwrap();
        assert!(matches!(
            manager.encrypt(b"x"),
            Err(KeyManagerError::Concurrency(ConcurrencyError::RotationInProgress))
        ));
        assert!(matches!(manager.encrypt_bytes(b"x"), Err(EncryptorError::Busy)));

        release_tx.send(()).unwrap();
        assert_eq!(rotating.join().unwrap(), 2);
        assert!(manager.encrypt(b"x").is_ok());
    }

    #[test]
    fn clear_key_destroys_key() {
        let (store, manager) = manager();
        manager.init().unwrap();
        manager.clear_key().unwrap();

        assert!(!manager.is_initialized());
        assert!(store.get(DEFAULT_KEY_ID).unwrap().is_none());
        assert!(matches!(
            manager.decrypt(&[0u8; 32]),
            Err(KeyManagerError::Key(KeyError::NotInitialized))
        ));
    }
}
