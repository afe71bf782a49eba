//! DuckDB-backed audit record store.
//!
//! Entries live in an `audit_entries` table keyed by a monotonically
//! increasing `seq` column that preserves insertion order. Filters from
//! [`AuditQuery`] are pushed down into SQL.

use crate::entry::{AuditEntry, AuditEntryId};
use crate::error::{AuditError, AuditResult};
use crate::store::{AuditQuery, AuditRecordStore};
use docvault_storage::SharedConnection;
use duckdb::types::Value;
use duckdb::{Connection, params, params_from_iter};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

const COLUMNS: &str = "id, level, action, resource_type, resource_id, user_id, timestamp, details, \
                       success, error_message, checksum, previous_entry_id, previous_checksum";

pub struct DuckDbAuditStore {
    conn: SharedConnection,
}

impl DuckDbAuditStore {
    /// Open with an existing shared connection.
    pub fn open_with_conn(conn: SharedConnection) -> AuditResult<Self> {
        let store = Self { conn };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Open in-memory.
    pub fn open_in_memory() -> AuditResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)))
    }

    fn lock(&self) -> AuditResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| AuditError::Storage(format!("lock poisoned: {e}")))
    }

    fn ensure_tables(&self) -> AuditResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_entries (
                seq BIGINT PRIMARY KEY,
                id VARCHAR NOT NULL UNIQUE,
                level VARCHAR NOT NULL,
                action VARCHAR NOT NULL,
                resource_type VARCHAR NOT NULL,
                resource_id VARCHAR NOT NULL,
                user_id VARCHAR NOT NULL,
                timestamp BIGINT NOT NULL,
                details VARCHAR,
                success BOOLEAN NOT NULL,
                error_message VARCHAR,
                checksum VARCHAR NOT NULL,
                previous_entry_id VARCHAR,
                previous_checksum VARCHAR
            );
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_entries(timestamp);",
        )?;
        Ok(())
    }

    fn select(&self, sql: &str, values: Vec<Value>) -> AuditResult<Vec<AuditEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), row_to_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawEntry::into_entry).collect()
    }
}

/// Column values as stored, before enum and id parsing.
struct RawEntry {
    id: String,
    level: String,
    action: String,
    resource_type: String,
    resource_id: String,
    user_id: String,
    timestamp: i64,
    details: Option<String>,
    success: bool,
    error_message: Option<String>,
    checksum: String,
    previous_entry_id: Option<String>,
    previous_checksum: Option<String>,
}

impl RawEntry {
    fn into_entry(self) -> AuditResult<AuditEntry> {
        Ok(AuditEntry {
            id: self.id.parse()?,
            level: self.level.parse()?,
            action: self.action.parse()?,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            user_id: self.user_id,
            timestamp: self.timestamp,
            details: self.details,
            success: self.success,
            error_message: self.error_message,
            checksum: self.checksum,
            previous_entry_id: self
                .previous_entry_id
                .map(|id| id.parse::<AuditEntryId>())
                .transpose()?,
            previous_checksum: self.previous_checksum,
        })
    }
}

fn row_to_raw(row: &duckdb::Row<'_>) -> duckdb::Result<RawEntry> {
    Ok(RawEntry {
        id: row.get(0)?,
        level: row.get(1)?,
        action: row.get(2)?,
        resource_type: row.get(3)?,
        resource_id: row.get(4)?,
        user_id: row.get(5)?,
        timestamp: row.get(6)?,
        details: row.get(7)?,
        success: row.get(8)?,
        error_message: row.get(9)?,
        checksum: row.get(10)?,
        previous_entry_id: row.get(11)?,
        previous_checksum: row.get(12)?,
    })
}

impl AuditRecordStore for DuckDbAuditStore {
    fn insert(&self, entry: &AuditEntry) -> AuditResult<u64> {
        let conn = self.lock()?;
        let seq: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq) + 1, 0) FROM audit_entries",
            [],
            |row| row.get(0),
        )?;
        conn.execute(
            &format!("INSERT INTO audit_entries (seq, {COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                seq,
                entry.id.to_string(),
                entry.level.as_str(),
                entry.action.as_str(),
                entry.resource_type,
                entry.resource_id,
                entry.user_id,
                entry.timestamp,
                entry.details,
                entry.success,
                entry.error_message,
                entry.checksum,
                entry.previous_entry_id.as_ref().map(|id| id.to_string()),
                entry.previous_checksum,
            ],
        )?;
        debug!("persisted audit entry {} at seq {seq}", entry.id);
        Ok(seq as u64)
    }

    fn last(&self) -> AuditResult<Option<AuditEntry>> {
        let sql = format!("SELECT {COLUMNS} FROM audit_entries ORDER BY seq DESC LIMIT 1");
        Ok(self.select(&sql, Vec::new())?.pop())
    }

    fn scan(&self) -> AuditResult<Vec<AuditEntry>> {
        let sql = format!("SELECT {COLUMNS} FROM audit_entries ORDER BY seq");
        self.select(&sql, Vec::new())
    }

    fn query(&self, query: &AuditQuery) -> AuditResult<Vec<AuditEntry>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(level) = query.level {
            clauses.push("level = ?");
            values.push(Value::Text(level.as_str().to_string()));
        }
        if let Some(action) = query.action {
            clauses.push("action = ?");
            values.push(Value::Text(action.as_str().to_string()));
        }
        if let Some(resource_type) = &query.resource_type {
            clauses.push("resource_type = ?");
            values.push(Value::Text(resource_type.clone()));
        }
        if let Some(resource_id) = &query.resource_id {
            clauses.push("resource_id = ?");
            values.push(Value::Text(resource_id.clone()));
        }
        if let Some(since) = query.since {
            clauses.push("timestamp >= ?");
            values.push(Value::BigInt(since));
        }
        if let Some(until) = query.until {
            clauses.push("timestamp < ?");
            values.push(Value::BigInt(until));
        }

        let mut sql = format!("SELECT {COLUMNS} FROM audit_entries");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY seq");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        self.select(&sql, values)
    }

    fn count(&self) -> AuditResult<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM audit_entries", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AuditAction, AuditLevel, AuditRecord};
    use pretty_assertions::assert_eq;

    fn seal(level: AuditLevel, action: AuditAction, ts: i64, prev: Option<&AuditEntry>) -> AuditEntry {
        AuditEntry::seal(
            level,
            AuditRecord::new(action, "document", "doc-1")
                .user("alice")
                .details("scan.pdf"),
            ts,
            prev,
        )
    }

    #[test]
    fn entries_survive_storage_unchanged() {
        let store = DuckDbAuditStore::open_in_memory().unwrap();
        let a = seal(AuditLevel::Compulsory, AuditAction::Write, 100, None);
        let b = AuditEntry::seal(
            AuditLevel::Info,
            AuditRecord::new(AuditAction::Delete, "document", "doc-1").failed("not found"),
            200,
            Some(&a),
        );

        assert_eq!(store.insert(&a).unwrap(), 0);
        assert_eq!(store.insert(&b).unwrap(), 1);

        let all = store.scan().unwrap();
        assert_eq!(all, vec![a, b.clone()]);
        assert_eq!(store.last().unwrap(), Some(b));
        assert!(all.iter().all(AuditEntry::has_valid_checksum));
    }

    #[test]
    fn query_pushes_filters_into_sql() {
        let store = DuckDbAuditStore::open_in_memory().unwrap();
        let a = seal(AuditLevel::Compulsory, AuditAction::Write, 100, None);
        let b = seal(AuditLevel::Info, AuditAction::Read, 200, Some(&a));
        let c = seal(AuditLevel::Verbose, AuditAction::Read, 300, Some(&b));
        for e in [&a, &b, &c] {
            store.insert(e).unwrap();
        }

        let reads = store.query(&AuditQuery::new().action(AuditAction::Read)).unwrap();
        assert_eq!(reads, vec![b.clone(), c.clone()]);

        let info = store.query(&AuditQuery::new().level(AuditLevel::Info)).unwrap();
        assert_eq!(info, vec![b.clone()]);

        let window = store.query(&AuditQuery::new().between(150, 300)).unwrap();
        assert_eq!(window, vec![b.clone()]);

        let limited = store
            .query(&AuditQuery::new().resource("document", "doc-1").limit(2))
            .unwrap();
        assert_eq!(limited, vec![a, b]);

        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn reopening_file_keeps_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.duckdb");
        let a = seal(AuditLevel::Info, AuditAction::Export, 1, None);

        {
            let conn = Arc::new(Mutex::new(Connection::open(&path).unwrap()));
            let store = DuckDbAuditStore::open_with_conn(conn).unwrap();
            store.insert(&a).unwrap();
        }

        let conn = Arc::new(Mutex::new(Connection::open(&path).unwrap()));
        let store = DuckDbAuditStore::open_with_conn(conn).unwrap();
        assert_eq!(store.scan().unwrap(), vec![a]);
    }
}
