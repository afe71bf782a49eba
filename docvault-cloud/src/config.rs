//! S3 transport configuration.

use crate::error::{CloudError, CloudResult};
use serde::{Deserialize, Serialize};

/// Configuration for the S3 backup transport.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// S3 bucket name.
    pub bucket: String,

    /// AWS region for S3.
    pub region: String,

    /// Optional S3 endpoint override (for MinIO in testing).
    pub endpoint_override: Option<String>,

    pub access_key_id: String,

    pub secret_access_key: String,

    /// Object key prefix; blobs are stored as `<prefix>/<remote id>`.
    pub key_prefix: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            bucket: "docvault-backups".to_string(),
            region: "us-east-1".to_string(),
            endpoint_override: None,
            access_key_id: String::new(),
            secret_access_key: String::new(),
            key_prefix: "backups".to_string(),
        }
    }
}

impl CloudConfig {
    pub fn validate(&self) -> CloudResult<()> {
        if self.bucket.is_empty() {
            return Err(CloudError::Config("bucket must not be empty".into()));
        }
        if self.region.is_empty() {
            return Err(CloudError::Config("region must not be empty".into()));
        }
        if self.access_key_id.is_empty() || self.secret_access_key.is_empty() {
            return Err(CloudError::Config("S3 credentials are not configured".into()));
        }
        Ok(())
    }

    /// Object key for `remote_id`.
    pub fn object_key(&self, remote_id: &str) -> String {
        format!("{}/{remote_id}", self.prefix())
    }

    /// Listing prefix, always ending in `/`.
    pub fn list_prefix(&self) -> String {
        format!("{}/", self.prefix())
    }

    fn prefix(&self) -> &str {
        self.key_prefix.trim_end_matches('/')
    }
}

impl std::fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint_override", &self.endpoint_override)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> CloudConfig {
        CloudConfig {
            access_key_id: "AKIA".into(),
            secret_access_key: "secret".into(),
            ..CloudConfig::default()
        }
    }

    #[test]
    fn default_needs_credentials() {
        assert!(matches!(CloudConfig::default().validate(), Err(CloudError::Config(_))));
        assert!(configured().validate().is_ok());
    }

    #[test]
    fn object_keys_use_prefix() {
        let mut cfg = configured();
        assert_eq!(cfg.object_key("abc"), "backups/abc");
        cfg.key_prefix = "user-1/".into();
        assert_eq!(cfg.object_key("abc"), "user-1/abc");
        assert_eq!(cfg.list_prefix(), "user-1/");
    }

    #[test]
    fn debug_hides_secret() {
        let shown = format!("{:?}", configured());
        assert!(!shown.contains("secret\""));
        assert!(shown.contains("REDACTED"));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: CloudConfig = serde_json::from_str(r#"{"bucket":"mine"}"#).unwrap();
        assert_eq!(cfg.bucket, "mine");
        assert_eq!(cfg.region, "us-east-1");
    }
}
