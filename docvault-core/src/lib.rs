//! DocVault security core.
//!
//! Wires the device-key [`KeyManager`](docvault_keys::KeyManager), the
//! encrypted [`DocumentStore`](docvault_storage::DocumentStore), the
//! tamper-evident [`AuditService`](docvault_audit::AuditService) and an
//! optional [`BlobTransport`](docvault_cloud::BlobTransport) into one
//! explicit service object, [`SecurityCore`], with `init`/`shutdown`.

pub mod config;
pub mod error;
pub mod logging;
mod vault;

pub use config::VaultConfig;
pub use error::{CoreError, CoreResult};
pub use logging::init_tracing;
pub use vault::SecurityCore;
