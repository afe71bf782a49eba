//! Level-filtered front end to the audit chain.

use crate::chain::{AuditChain, ChainVerificationResult};
use crate::config::AuditConfig;
use crate::entry::{AuditEntry, AuditEntryId, AuditLevel, AuditRecord};
use crate::error::{AuditError, AuditResult};
use crate::store::{AuditQuery, AuditRecordStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Decides which operations become audit entries and exposes query and
/// verification to the rest of the application.
pub struct AuditService {
    chain: AuditChain,
    min_level: RwLock<AuditLevel>,
    default_user_id: String,
    running: AtomicBool,
}

impl AuditService {
    pub fn new(store: Arc<dyn AuditRecordStore>, config: AuditConfig) -> Self {
        Self {
            chain: AuditChain::new(store),
            min_level: RwLock::new(config.min_level),
            default_user_id: config.default_user_id,
            running: AtomicBool::new(false),
        }
    }

    /// Starts accepting records after a full chain verification.
    ///
    /// Integrity issues are logged and returned, they do not prevent startup.
    pub fn init(&self) -> AuditResult<ChainVerificationResult> {
        let result = self.chain.verify_detailed()?;
        if result.is_valid() {
            info!("audit chain verified ({} entries)", result.entries_verified);
        } else {
            warn!(
                "audit chain has {} integrity issue(s) across {} entries",
                result.issues.len(),
                result.entries_verified
            );
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(result)
    }

    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("audit service stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn min_level(&self) -> AuditLevel {
        self.min_level
            .read()
            .map(|l| *l)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    pub fn set_min_level(&self, level: AuditLevel) {
        match self.min_level.write() {
            Ok(mut current) => *current = level,
            Err(poisoned) => *poisoned.into_inner() = level,
        }
        info!("audit level set to {level}");
    }

    /// Whether an entry at `level` would be recorded under the current setting.
    pub fn should_record(&self, level: AuditLevel) -> bool {
        level == AuditLevel::Compulsory || level.priority() <= self.min_level().priority()
    }

    /// Appends `record` at `level` if the level passes the filter.
    ///
    /// Returns `Ok(None)` when the record was filtered out.
    pub fn record(&self, level: AuditLevel, mut record: AuditRecord) -> AuditResult<Option<AuditEntry>> {
        if !self.is_running() {
            return Err(AuditError::NotInitialized);
        }
        if !self.should_record(level) {
            return Ok(None);
        }
        if record.user_id.is_empty() {
            record.user_id = self.default_user_id.clone();
        }
        self.chain.append(level, record).map(Some)
    }

    /// Like [`record`](Self::record), but failures are logged instead of returned.
    ///
    /// Used by business operations that must complete even when the audit
    /// trail cannot be written.
    pub fn record_best_effort(&self, level: AuditLevel, record: AuditRecord) -> Option<AuditEntry> {
        let action = record.action;
        let resource = format!("{}/{}", record.resource_type, record.resource_id);
        match self.record(level, record) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to persist audit entry for {action} {resource}: {e}");
                None
            }
        }
    }

    /// Entries matching `query`, in chain order.
    pub fn query(&self, query: &AuditQuery) -> AuditResult<Vec<AuditEntry>> {
        self.chain.query(query)
    }

    /// Ids of every entry that fails integrity verification.
    pub fn verify(&self) -> AuditResult<Vec<AuditEntryId>> {
        self.chain.verify_integrity()
    }

    pub fn verify_detailed(&self) -> AuditResult<ChainVerificationResult> {
        self.chain.verify_detailed()
    }

    pub fn chain(&self) -> &AuditChain {
        &self.chain
    }
}
