use crate::core::{EntityError, Result};
use serde::{Deserialize, Serialize};

/// Engine-wide settings
///
/// Every key is optional when loaded from JSON; missing keys keep defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    /// Maximum length of old/new value text in an audit entry
    pub audit_value_max_len: usize,

    /// Maximum length of the artifact stack text in an audit entry
    pub artifact_stack_max_len: usize,

    /// Master switch for audit emission
    pub audit_log_enabled: bool,

    /// Register advisory record locks on writes
    pub lock_tracking: bool,

    /// Default zero-padding for secondary sequenced keys
    pub secondary_padded_length: usize,

    /// Longer scalar values are exported as CDATA elements
    pub xml_attribute_max_len: usize,

    /// Separator for combined primary-key text
    pub pk_separator: String,
}

impl EntityConfig {
    pub fn new() -> Self {
        Self {
            audit_value_max_len: 4000,
            artifact_stack_max_len: 4000,
            audit_log_enabled: true,
            lock_tracking: true,
            secondary_padded_length: 2,
            xml_attribute_max_len: 255,
            pk_separator: "::".to_string(),
        }
    }

    /// Parse a (possibly partial) JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn audit_log_enabled(mut self, enabled: bool) -> Self {
        self.audit_log_enabled = enabled;
        self
    }

    pub fn lock_tracking(mut self, enabled: bool) -> Self {
        self.lock_tracking = enabled;
        self
    }

    pub fn audit_value_max_len(mut self, len: usize) -> Self {
        self.audit_value_max_len = len;
        self
    }

    pub fn artifact_stack_max_len(mut self, len: usize) -> Self {
        self.artifact_stack_max_len = len;
        self
    }

    pub fn secondary_padded_length(mut self, len: usize) -> Self {
        self.secondary_padded_length = len;
        self
    }

    pub fn xml_attribute_max_len(mut self, len: usize) -> Self {
        self.xml_attribute_max_len = len;
        self
    }

    pub fn pk_separator(mut self, separator: &str) -> Self {
        self.pk_separator = separator.to_string();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.audit_value_max_len == 0 {
            return Err(EntityError::Configuration(
                "audit_value_max_len must be > 0".into(),
            ));
        }
        if self.artifact_stack_max_len == 0 {
            return Err(EntityError::Configuration(
                "artifact_stack_max_len must be > 0".into(),
            ));
        }
        if self.pk_separator.is_empty() {
            return Err(EntityError::Configuration(
                "pk_separator cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EntityConfig::default();
        assert_eq!(config.audit_value_max_len, 4000);
        assert_eq!(config.secondary_padded_length, 2);
        assert_eq!(config.pk_separator, "::");
        assert!(config.audit_log_enabled);
        assert!(config.lock_tracking);
    }

    #[test]
    fn test_builder_pattern() {
        let config = EntityConfig::new()
            .audit_log_enabled(false)
            .secondary_padded_length(5)
            .pk_separator("|");

        assert!(!config.audit_log_enabled);
        assert_eq!(config.secondary_padded_length, 5);
        assert_eq!(config.pk_separator, "|");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            EntityConfig::from_json_str(r#"{"lock_tracking": false, "xml_attribute_max_len": 80}"#)
                .unwrap();
        assert!(!config.lock_tracking);
        assert_eq!(config.xml_attribute_max_len, 80);
        assert_eq!(config.audit_value_max_len, 4000);
    }

    #[test]
    fn test_validate() {
        assert!(EntityConfig::from_json_str(r#"{"pk_separator": ""}"#).is_err());
        assert!(EntityConfig::new().audit_value_max_len(0).validate().is_err());
        assert!(matches!(
            EntityConfig::from_json_str("not json"),
            Err(EntityError::Configuration(_))
        ));
    }
}
