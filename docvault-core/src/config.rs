//! Vault configuration, loaded from JSON.

use crate::error::{CoreError, CoreResult};
use docvault_audit::AuditConfig;
use docvault_cloud::CloudConfig;
use docvault_crypto::{DEFAULT_KDF_ITERATIONS, KdfParams, MIN_KDF_ITERATIONS};
use docvault_keys::DEFAULT_KEY_ID;
use docvault_storage::IN_MEMORY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// DuckDB file holding documents, keys and the audit chain.
    /// `":memory:"` keeps everything in memory.
    pub database_path: PathBuf,

    /// Secure-store id of the device key.
    pub key_id: String,

    /// PBKDF2 iterations for exported backups.
    pub kdf_iterations: u32,

    pub duckdb_memory_limit: String,

    pub duckdb_threads: u32,

    pub audit: AuditConfig,

    /// Remote backup target. Backups are unavailable when unset.
    pub cloud: Option<CloudConfig>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(IN_MEMORY),
            key_id: DEFAULT_KEY_ID.to_string(),
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            duckdb_memory_limit: "256MB".to_string(),
            duckdb_threads: 2,
            audit: AuditConfig::default(),
            cloud: None,
        }
    }
}

impl VaultConfig {
    /// In-memory vault with the lowest accepted KDF cost. For tests.
    pub fn in_memory() -> Self {
        Self {
            kdf_iterations: MIN_KDF_ITERATIONS,
            ..Self::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(CoreError::Config(format!(
                "kdf_iterations must be at least {MIN_KDF_ITERATIONS}, got {}",
                self.kdf_iterations
            )));
        }
        if self.key_id.is_empty() {
            return Err(CoreError::Config("key_id must not be empty".into()));
        }
        if self.duckdb_threads == 0 {
            return Err(CoreError::Config("duckdb_threads must be at least 1".into()));
        }
        if let Some(cloud) = &self.cloud {
            cloud.validate()?;
        }
        Ok(())
    }

    pub fn kdf_params(&self) -> CoreResult<KdfParams> {
        Ok(KdfParams::new(self.kdf_iterations)?)
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docvault_audit::AuditLevel;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let cfg = VaultConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.is_in_memory());
        assert_eq!(cfg.kdf_iterations, 600_000);
    }

    #[test]
    fn weak_iterations_rejected() {
        let cfg = VaultConfig {
            kdf_iterations: 10_000,
            ..VaultConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn loads_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"database_path": "/tmp/vault.duckdb", "audit": {{"min_level": "COMPULSORY"}}}}"#
        )
        .unwrap();

        let cfg = VaultConfig::from_json_file(file.path()).unwrap();
        assert_eq!(cfg.database_path, PathBuf::from("/tmp/vault.duckdb"));
        assert_eq!(cfg.audit.min_level, AuditLevel::Compulsory);
        assert_eq!(cfg.key_id, DEFAULT_KEY_ID);
        assert!(!cfg.is_in_memory());
    }

    #[test]
    fn invalid_file_contents_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"kdf_iterations": 5}}"#).unwrap();
        assert!(matches!(
            VaultConfig::from_json_file(file.path()),
            Err(CoreError::Config(_))
        ));

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        write!(garbage, "not json").unwrap();
        assert!(matches!(
            VaultConfig::from_json_file(garbage.path()),
            Err(CoreError::Json(_))
        ));
    }

    #[test]
    fn cloud_section_is_validated() {
        let cfg = VaultConfig {
            cloud: Some(CloudConfig::default()),
            ..VaultConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(CoreError::Cloud(_))));
    }
}
