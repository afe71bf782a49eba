//! Audit service configuration.

use crate::entry::AuditLevel;
use serde::{Deserialize, Serialize};

/// Configuration for the audit service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Least important level that is still recorded. `COMPULSORY` entries
    /// are recorded whatever this is set to.
    pub min_level: AuditLevel,

    /// User id stamped on records that do not name one.
    pub default_user_id: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            min_level: AuditLevel::Info,
            default_user_id: "local".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: AuditConfig = serde_json::from_str(r#"{"min_level":"VERBOSE"}"#).unwrap();
        assert_eq!(cfg.min_level, AuditLevel::Verbose);
        assert_eq!(cfg.default_user_id, "local");
    }
}
