//! Device key management for DocVault.
//!
//! - [`SecureKeyStore`]: opaque get/set/delete of raw key bytes
//! - [`PassphraseKeyStore`]: wraps a store so material is only written
//!   encrypted under a passphrase-derived key
//! - [`KeyManager`]: generates the device key on first use, rotates and
//!   destroys it, and performs all device-key encryption

mod error;
mod manager;
mod store;

pub use error::{ConcurrencyError, KeyError, KeyManagerError, KeyManagerResult, KeyResult};
pub use manager::{DEFAULT_KEY_ID, KeyManager};
pub use store::{
    DuckDbKeyStore, MIN_PASSPHRASE_LEN, MemoryKeyStore, PassphraseKeyStore, SecureKeyStore,
};
