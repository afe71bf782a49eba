//! Audit entry types and checksum computation.
//!
//! Every sensitive operation on a stored record becomes one immutable
//! [`AuditEntry`]. Entries are chain-linked: each stores the checksum of
//! its predecessor, and its own checksum covers its fields plus that
//! predecessor checksum.

use crate::error::AuditError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Checksum input used in place of a predecessor checksum for the first entry.
pub const GENESIS_SEED: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Domain tag prefixed to the canonical encoding.
const CANONICAL_TAG: &[u8] = b"docvault-audit-v1";

/// Unique identifier of an audit entry (UUID v7, time-ordered).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditEntryId(pub Uuid);

impl AuditEntryId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AuditEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuditEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AuditEntryId {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| AuditError::Serialization(format!("invalid entry id {s}: {e}")))
    }
}

/// Verbosity class of an entry.
///
/// `Compulsory` entries are recorded regardless of configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditLevel {
    Compulsory,
    Info,
    Verbose,
}

impl AuditLevel {
    /// Lower is more important.
    pub fn priority(self) -> u8 {
        match self {
            AuditLevel::Compulsory => 0,
            AuditLevel::Info => 1,
            AuditLevel::Verbose => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuditLevel::Compulsory => "COMPULSORY",
            AuditLevel::Info => "INFO",
            AuditLevel::Verbose => "VERBOSE",
        }
    }
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditLevel {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "COMPULSORY" => Ok(AuditLevel::Compulsory),
            "INFO" => Ok(AuditLevel::Info),
            "VERBOSE" => Ok(AuditLevel::Verbose),
            _ => Err(AuditError::UnknownLevel(s.to_string())),
        }
    }
}

/// Operation being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Read,
    Write,
    Delete,
    Export,
    Import,
    Upload,
    Download,
    KeyRotate,
    KeyClear,
    IntegrityCheck,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Read => "read",
            AuditAction::Write => "write",
            AuditAction::Delete => "delete",
            AuditAction::Export => "export",
            AuditAction::Import => "import",
            AuditAction::Upload => "upload",
            AuditAction::Download => "download",
            AuditAction::KeyRotate => "key_rotate",
            AuditAction::KeyClear => "key_clear",
            AuditAction::IntegrityCheck => "integrity_check",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s {
            "read" => AuditAction::Read,
            "write" => AuditAction::Write,
            "delete" => AuditAction::Delete,
            "export" => AuditAction::Export,
            "import" => AuditAction::Import,
            "upload" => AuditAction::Upload,
            "download" => AuditAction::Download,
            "key_rotate" => AuditAction::KeyRotate,
            "key_clear" => AuditAction::KeyClear,
            "integrity_check" => AuditAction::IntegrityCheck,
            _ => return Err(AuditError::UnknownAction(s.to_string())),
        };
        Ok(action)
    }
}

/// Caller-supplied description of an operation, before it is sealed into the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: String,
    /// Empty means "use the service's default user".
    pub user_id: String,
    pub details: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl AuditRecord {
    /// A successful operation on `resource_type`/`resource_id`.
    pub fn new(
        action: AuditAction,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            action,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            user_id: String::new(),
            details: None,
            success: true,
            error_message: None,
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Marks the operation as failed with `error`.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error.into());
        self
    }
}

/// A sealed, immutable audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub level: AuditLevel,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: String,
    pub user_id: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    pub details: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    /// Hex SHA-256 over the canonical fields and `previous_checksum`.
    pub checksum: String,
    pub previous_entry_id: Option<AuditEntryId>,
    /// `None` only for the first entry in the chain.
    pub previous_checksum: Option<String>,
}

impl AuditEntry {
    /// Seals `record` into a new entry linked after `previous`.
    pub fn seal(
        level: AuditLevel,
        record: AuditRecord,
        timestamp: i64,
        previous: Option<&AuditEntry>,
    ) -> Self {
        let mut entry = Self {
            id: AuditEntryId::new(),
            level,
            action: record.action,
            resource_type: record.resource_type,
            resource_id: record.resource_id,
            user_id: record.user_id,
            timestamp,
            details: record.details,
            success: record.success,
            error_message: record.error_message,
            checksum: String::new(),
            previous_entry_id: previous.map(|p| p.id.clone()),
            previous_checksum: previous.map(|p| p.checksum.clone()),
        };
        entry.checksum = entry.compute_checksum();
        entry
    }

    /// Order-stable encoding of every field except `checksum`.
    ///
    /// Each field is written as a 4-byte big-endian length followed by its
    /// bytes; optional fields carry a presence byte first.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        put(&mut out, CANONICAL_TAG);
        put(&mut out, self.id.0.as_bytes());
        put(&mut out, self.level.as_str().as_bytes());
        put(&mut out, self.action.as_str().as_bytes());
        put(&mut out, self.resource_type.as_bytes());
        put(&mut out, self.resource_id.as_bytes());
        put(&mut out, self.user_id.as_bytes());
        put(&mut out, &self.timestamp.to_be_bytes());
        put_opt(&mut out, self.details.as_deref().map(str::as_bytes));
        put(&mut out, &[u8::from(self.success)]);
        put_opt(&mut out, self.error_message.as_deref().map(str::as_bytes));
        put_opt(&mut out, self.previous_entry_id.as_ref().map(|id| id.0.as_bytes().as_slice()));
        out
    }

    /// Recomputes the checksum from the entry's own fields and its claimed
    /// `previous_checksum` (or [`GENESIS_SEED`]).
    pub fn compute_checksum(&self) -> String {
        let previous = self.previous_checksum.as_deref().unwrap_or(GENESIS_SEED);
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        hasher.update(previous.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn has_valid_checksum(&self) -> bool {
        self.compute_checksum() == self.checksum
    }

    pub fn is_genesis(&self) -> bool {
        self.previous_entry_id.is_none() && self.previous_checksum.is_none()
    }

    /// One-line description for logs and listings.
    pub fn description(&self) -> String {
        let outcome = if self.success { "ok" } else { "failed" };
        format!(
            "{} {} {}/{} by {} ({outcome})",
            self.level, self.action, self.resource_type, self.resource_id, self.user_id
        )
    }
}

fn put(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn put_opt(out: &mut Vec<u8>, bytes: Option<&[u8]>) {
    match bytes {
        Some(b) => {
            out.push(1);
            put(out, b);
        }
        None => out.push(0),
    }
}
