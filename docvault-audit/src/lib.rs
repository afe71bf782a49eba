//! Tamper-evident audit trail for DocVault.
//!
//! Every sensitive operation on a stored record is reported to the
//! [`AuditService`], which filters it by level and appends it to the
//! [`AuditChain`]. Each entry's checksum is `SHA-256(canonical fields ||
//! previous checksum)`, so altering any stored entry breaks verification
//! of that entry and of the one after it.
//!
//! Entries are kept as an arena indexed by insertion order behind the
//! [`AuditRecordStore`] trait: [`MemoryAuditStore`] for tests and ephemeral
//! use, [`DuckDbAuditStore`] for the vault database.

mod chain;
mod config;
mod duckdb_store;
mod entry;
mod error;
mod service;
mod store;

pub use chain::{AuditChain, ChainIssue, ChainVerificationResult};
pub use config::AuditConfig;
pub use duckdb_store::DuckDbAuditStore;
pub use entry::{AuditAction, AuditEntry, AuditEntryId, AuditLevel, AuditRecord, GENESIS_SEED};
pub use error::{AuditError, AuditResult};
pub use service::AuditService;
pub use store::{AuditQuery, AuditRecordStore, MemoryAuditStore};
