//! Audit record storage trait and the in-memory arena implementation.

use crate::entry::{AuditAction, AuditEntry, AuditLevel};
use crate::error::{AuditError, AuditResult};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Filters for [`AuditRecordStore::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    pub level: Option<AuditLevel>,
    pub action: Option<AuditAction>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    /// Inclusive lower bound, Unix milliseconds.
    pub since: Option<i64>,
    /// Exclusive upper bound, Unix milliseconds.
    pub until: Option<i64>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: AuditLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn resource(mut self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn between(mut self, since: i64, until: i64) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `entry` satisfies every filter except `limit`.
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.level.is_none_or(|l| entry.level == l)
            && self.action.is_none_or(|a| entry.action == a)
            && self
                .resource_type
                .as_deref()
                .is_none_or(|t| entry.resource_type == t)
            && self
                .resource_id
                .as_deref()
                .is_none_or(|id| entry.resource_id == id)
            && self.since.is_none_or(|s| entry.timestamp >= s)
            && self.until.is_none_or(|u| entry.timestamp < u)
    }
}

/// Durable, append-only storage for audit entries.
///
/// Entries are addressed by their insertion position. Implementations only
/// need ordered insert and ordered/range reads; ordering and linkage are
/// enforced by [`crate::AuditChain`], which is the only writer.
pub trait AuditRecordStore: Send + Sync {
    /// Persist `entry` at the next position and return that position.
    fn insert(&self, entry: &AuditEntry) -> AuditResult<u64>;

    /// The most recently inserted entry, if any.
    fn last(&self) -> AuditResult<Option<AuditEntry>>;

    /// Every entry in insertion order.
    fn scan(&self) -> AuditResult<Vec<AuditEntry>>;

    /// Entries matching `query`, in insertion order.
    fn query(&self, query: &AuditQuery) -> AuditResult<Vec<AuditEntry>>;

    fn count(&self) -> AuditResult<u64>;
}

/// Arena of entries indexed by insertion order.
#[derive(Default)]
pub struct MemoryAuditStore {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> AuditResult<RwLockReadGuard<'_, Vec<AuditEntry>>> {
        self.entries
            .read()
            .map_err(|e| AuditError::Storage(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> AuditResult<RwLockWriteGuard<'_, Vec<AuditEntry>>> {
        self.entries
            .write()
            .map_err(|e| AuditError::Storage(format!("lock poisoned: {e}")))
    }

    /// Overwrites the entry at `index` in place, bypassing the chain.
    #[cfg(test)]
    pub(crate) fn overwrite(&self, index: usize, entry: AuditEntry) {
        self.entries.write().unwrap()[index] = entry;
    }
}

impl AuditRecordStore for MemoryAuditStore {
    fn insert(&self, entry: &AuditEntry) -> AuditResult<u64> {
        let mut entries = self.write()?;
        entries.push(entry.clone());
        Ok(entries.len() as u64 - 1)
    }

    fn last(&self) -> AuditResult<Option<AuditEntry>> {
        Ok(self.read()?.last().cloned())
    }

    fn scan(&self) -> AuditResult<Vec<AuditEntry>> {
        Ok(self.read()?.clone())
    }

    fn query(&self, query: &AuditQuery) -> AuditResult<Vec<AuditEntry>> {
        let entries = self.read()?;
        let matching = entries.iter().filter(|e| query.matches(e)).cloned();
        Ok(match query.limit {
            Some(n) => matching.take(n).collect(),
            None => matching.collect(),
        })
    }

    fn count(&self) -> AuditResult<u64> {
        Ok(self.read()?.len() as u64)
    }
}
