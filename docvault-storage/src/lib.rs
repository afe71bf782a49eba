//! DuckDB storage layer for DocVault.
//!
//! Provides:
//! - A connection helper with stale WAL recovery and resource limits,
//!   shared by the document, key and audit stores.
//! - [`DocumentStore`]: namespace-scoped document bytes, encrypted at rest
//!   through a [`docvault_crypto::DataEncryptor`].

mod document_store;
mod error;

pub use document_store::{DocumentMetadata, DocumentStore};
pub use error::{StorageError, StorageResult};

use duckdb::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Path value that selects an in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// A DuckDB connection shared between stores.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Opens a DuckDB file, recovering once from a stale write-ahead log.
///
/// An unclean shutdown can leave `<db>.wal` behind in a state DuckDB refuses
/// to replay. If the first open fails and that file exists, it is removed
/// and the open is retried. Resource limits are applied to the connection
/// that is returned: DuckDB otherwise claims most of the RAM and every core.
pub fn open_duckdb_with_wal_recovery(
    path: &Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<Connection> {
    let conn = Connection::open(path).or_else(|first_err| {
        let wal = stale_wal_path(path);
        if !wal.exists() {
            return Err(first_err);
        }
        warn!(wal = %wal.display(), "vault database failed to open; discarding stale WAL");
        std::fs::remove_file(&wal).map_err(|_| first_err)?;
        Connection::open(path)
    })?;

    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

/// `vault.duckdb` -> `vault.duckdb.wal`, `vault` -> `vault.wal`.
fn stale_wal_path(path: &Path) -> PathBuf {
    let ext = match path.extension() {
        Some(ext) => format!("{}.wal", ext.to_string_lossy()),
        None => "wal".to_string(),
    };
    path.with_extension(ext)
}

/// Opens `path` (or an in-memory database for [`IN_MEMORY`]) as a shared connection.
pub fn open_shared(path: &Path, memory_limit: &str, threads: u32) -> StorageResult<SharedConnection> {
    let conn = if path.to_str() == Some(IN_MEMORY) {
        Connection::open_in_memory()?
    } else {
        open_duckdb_with_wal_recovery(path, memory_limit, threads)?
    };
    Ok(Arc::new(Mutex::new(conn)))
}

fn apply_resource_limits(conn: &Connection, memory_limit: &str, threads: u32) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "SET memory_limit = '{memory_limit}'; SET threads = {threads};"
    ))?;
    Ok(())
}
