//! The append-only hash chain.
//!
//! [`AuditChain`] is the single writer of an [`AuditRecordStore`]. Appends
//! are serialized behind an exclusive gate so two writers can never both
//! link to the same predecessor; verification and queries share the gate
//! and therefore never observe a half-finished append.

use crate::entry::{AuditEntry, AuditEntryId, AuditLevel, AuditRecord};
use crate::error::{AuditError, AuditResult};
use crate::store::{AuditQuery, AuditRecordStore};
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// A problem found while verifying the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainIssue {
    /// The stored checksum does not match the entry's own fields.
    ChecksumMismatch {
        entry_id: AuditEntryId,
        stored: String,
        computed: String,
    },
    /// The entry does not link to the recomputed checksum of the entry
    /// immediately before it.
    BrokenLink {
        entry_id: AuditEntryId,
        expected_previous: Option<String>,
        actual_previous: Option<String>,
    },
    /// The first entry claims a predecessor.
    InvalidGenesis { entry_id: AuditEntryId },
}

impl ChainIssue {
    pub fn entry_id(&self) -> &AuditEntryId {
        match self {
            Self::ChecksumMismatch { entry_id, .. }
            | Self::BrokenLink { entry_id, .. }
            | Self::InvalidGenesis { entry_id } => entry_id,
        }
    }
}

impl fmt::Display for ChainIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChecksumMismatch { entry_id, .. } => write!(f, "checksum mismatch at {entry_id}"),
            Self::BrokenLink { entry_id, .. } => write!(f, "broken chain link at {entry_id}"),
            Self::InvalidGenesis { entry_id } => write!(f, "invalid genesis at {entry_id}"),
        }
    }
}

/// Outcome of a full chain scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainVerificationResult {
    pub entries_verified: usize,
    pub issues: Vec<ChainIssue>,
}

impl ChainVerificationResult {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    /// Ids of every entry with at least one issue, in chain order, without duplicates.
    pub fn invalid_entry_ids(&self) -> Vec<AuditEntryId> {
        let mut ids: Vec<AuditEntryId> = Vec::new();
        for issue in &self.issues {
            let id = issue.entry_id();
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}

pub struct AuditChain {
    store: Arc<dyn AuditRecordStore>,
    gate: RwLock<()>,
}

impl AuditChain {
    pub fn new(store: Arc<dyn AuditRecordStore>) -> Self {
        Self {
            store,
            gate: RwLock::new(()),
        }
    }

    fn exclusive(&self) -> AuditResult<RwLockWriteGuard<'_, ()>> {
        self.gate
            .write()
            .map_err(|e| AuditError::Storage(format!("chain gate poisoned: {e}")))
    }

    fn shared(&self) -> AuditResult<RwLockReadGuard<'_, ()>> {
        self.gate
            .read()
            .map_err(|e| AuditError::Storage(format!("chain gate poisoned: {e}")))
    }

    /// Seals `record` after the current last entry and persists it.
    ///
    /// Nothing is written if the store rejects the entry.
    pub fn append(&self, level: AuditLevel, record: AuditRecord) -> AuditResult<AuditEntry> {
        let _guard = self.exclusive()?;

        let previous = self.store.last()?;
        let entry = AuditEntry::seal(
            level,
            record,
            Utc::now().timestamp_millis(),
            previous.as_ref(),
        );
        let seq = self.store.insert(&entry)?;

        debug!("appended audit entry {} at {seq}: {}", entry.id, entry.description());
        Ok(entry)
    }

    /// Entries matching `query`, in chain order.
    pub fn query(&self, query: &AuditQuery) -> AuditResult<Vec<AuditEntry>> {
        let _guard = self.shared()?;
        self.store.query(query)
    }

    pub fn len(&self) -> AuditResult<u64> {
        let _guard = self.shared()?;
        self.store.count()
    }

    pub fn is_empty(&self) -> AuditResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Scans the whole chain and reports every issue found.
    ///
    /// Each entry's checksum is recomputed from its own fields and claimed
    /// `previous_checksum`. Its link is then checked against the recomputed
    /// (not stored) checksum of the entry it names as predecessor, which must
    /// be the entry directly before it. The scan never stops early.
    pub fn verify_detailed(&self) -> AuditResult<ChainVerificationResult> {
        let entries = {
            let _guard = self.shared()?;
            self.store.scan()?
        };

        let recomputed: Vec<String> = entries.iter().map(AuditEntry::compute_checksum).collect();
        let position: HashMap<&AuditEntryId, usize> =
            entries.iter().enumerate().map(|(i, e)| (&e.id, i)).collect();

        let mut issues = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            if recomputed[i] != entry.checksum {
                issues.push(ChainIssue::ChecksumMismatch {
                    entry_id: entry.id.clone(),
                    stored: entry.checksum.clone(),
                    computed: recomputed[i].clone(),
                });
            }

            if i == 0 {
                if !entry.is_genesis() {
                    issues.push(ChainIssue::InvalidGenesis {
                        entry_id: entry.id.clone(),
                    });
                }
                continue;
            }

            let claimed = entry
                .previous_entry_id
                .as_ref()
                .and_then(|id| position.get(id).copied());
            let linked = claimed == Some(i - 1)
                && entry.previous_checksum.as_deref() == Some(recomputed[i - 1].as_str());
            if !linked {
                issues.push(ChainIssue::BrokenLink {
                    entry_id: entry.id.clone(),
                    expected_previous: Some(recomputed[i - 1].clone()),
                    actual_previous: entry.previous_checksum.clone(),
                });
            }
        }

        for issue in &issues {
            warn!("audit chain integrity issue: {issue}");
        }

        Ok(ChainVerificationResult {
            entries_verified: entries.len(),
            issues,
        })
    }

    /// Ids of every entry that fails verification, in chain order.
    pub fn verify_integrity(&self) -> AuditResult<Vec<AuditEntryId>> {
        Ok(self.verify_detailed()?.invalid_entry_ids())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuditAction;
    use crate::store::MemoryAuditStore;
    use pretty_assertions::assert_eq;

    fn record(id: &str) -> AuditRecord {
        AuditRecord::new(AuditAction::Write, "document", id).user("alice")
    }

    fn chain_of_three() -> (Arc<MemoryAuditStore>, AuditChain, Vec<AuditEntry>) {
        let store = Arc::new(MemoryAuditStore::new());
        let chain = AuditChain::new(store.clone());
        let entries = ["a", "b", "c"]
            .iter()
            .map(|id| chain.append(AuditLevel::Info, record(id)).unwrap())
            .collect();
        (store, chain, entries)
    }

    #[test]
    fn appends_link_to_predecessor() {
        let (_, _, entries) = chain_of_three();
        assert!(entries[0].is_genesis());
        assert_eq!(entries[1].previous_entry_id.as_ref(), Some(&entries[0].id));
        assert_eq!(entries[2].previous_checksum.as_ref(), Some(&entries[1].checksum));
    }

    #[test]
    fn clean_chain_verifies() {
        let (_, chain, _) = chain_of_three();
        let result = chain.verify_detailed().unwrap();
        assert!(result.is_valid());
        assert_eq!(result.entries_verified, 3);
        assert!(chain.verify_integrity().unwrap().is_empty());
    }

    #[test]
    fn empty_chain_verifies() {
        let chain = AuditChain::new(Arc::new(MemoryAuditStore::new()));
        assert!(chain.verify_integrity().unwrap().is_empty());
        assert!(chain.is_empty().unwrap());
    }

    #[test]
    fn tampered_field_flags_entry_and_successor() {
        let (store, chain, entries) = chain_of_three();
        let mut b = entries[1].clone();
        b.resource_id = "someone-else".into();
        store.overwrite(1, b);

        let result = chain.verify_detailed().unwrap();
        assert!(matches!(&result.issues[0], ChainIssue::ChecksumMismatch { entry_id, .. } if *entry_id == entries[1].id));
        assert!(matches!(&result.issues[1], ChainIssue::BrokenLink { entry_id, .. } if *entry_id == entries[2].id));
        assert_eq!(
            chain.verify_integrity().unwrap(),
            vec![entries[1].id.clone(), entries[2].id.clone()]
        );
    }

    #[test]
    fn resealed_tampering_still_breaks_the_link() {
        let (store, chain, entries) = chain_of_three();
        let mut b = entries[1].clone();
        b.success = false;
        b.checksum = b.compute_checksum();
        store.overwrite(1, b);

        assert_eq!(chain.verify_integrity().unwrap(), vec![entries[2].id.clone()]);
    }

    #[test]
    fn every_tampered_entry_is_reported() {
        let store = Arc::new(MemoryAuditStore::new());
        let chain = AuditChain::new(store.clone());
        let entries: Vec<_> = (0..6)
            .map(|i| chain.append(AuditLevel::Info, record(&format!("d{i}"))).unwrap())
            .collect();

        for i in [1, 4] {
            let mut e = entries[i].clone();
            e.user_id = "mallory".into();
            store.overwrite(i, e);
        }

        let ids = chain.verify_integrity().unwrap();
        assert_eq!(
            ids,
            vec![
                entries[1].id.clone(),
                entries[2].id.clone(),
                entries[4].id.clone(),
                entries[5].id.clone(),
            ]
        );
    }

    #[test]
    fn forged_genesis_is_reported() {
        let (store, chain, entries) = chain_of_three();
        let mut a = entries[0].clone();
        a.previous_checksum = Some("00".repeat(32));
        a.checksum = a.compute_checksum();
        store.overwrite(0, a);

        let result = chain.verify_detailed().unwrap();
        assert!(result
            .issues
            .iter()
            .any(|i| matches!(i, ChainIssue::InvalidGenesis { entry_id } if *entry_id == entries[0].id)));
    }

    #[test]
    fn concurrent_appends_never_fork() {
        let store = Arc::new(MemoryAuditStore::new());
        let chain = Arc::new(AuditChain::new(store.clone()));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let chain = chain.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        chain
                            .append(AuditLevel::Info, record(&format!("t{t}-{i}")))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(chain.len().unwrap(), 200);
        assert!(chain.verify_integrity().unwrap().is_empty());

        let entries = store.scan().unwrap();
        let mut predecessors: Vec<_> = entries
            .iter()
            .filter_map(|e| e.previous_entry_id.clone())
            .collect();
        predecessors.sort_by_key(|id| id.to_string());
        predecessors.dedup();
        assert_eq!(predecessors.len(), 199);
    }
}
