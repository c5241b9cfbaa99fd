//! Engine settings, loaded through `config-engine`
//!
//! ```yaml
//! database:
//!   db_path: /data/reliefwatch.db
//! remote:
//!   base_url: https://sync.reliefwatch.dev/api/v1
//! sync:
//!   max_retries: 3
//! ```
//!
//! Every section has defaults; `RELIEFWATCH_SYNC__MAX_RETRIES=5` and the like
//! override single values.

use crate::conflict_resolution::SeverityPolicy;
use crate::local_db::{LocalDbConfig, RetentionPolicy};
use crate::models::PriorityRule;
use crate::priority::PriorityWeights;
use crate::record_encryption::SensitivityPolicy;
use crate::remote::RemoteConfig;
use config_engine::{ConfigLoader, Validate};
use logger_redacted::LoggerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Backoff before retry `n` is `backoff_base_ms * 2^(n-1)`
    pub backoff_base_ms: u64,
    /// Queue items submitted per `process_queue` run
    pub batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1_000,
            batch_size: 50,
        }
    }
}

impl SyncOptions {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub database: LocalDbConfig,
    pub remote: RemoteConfig,
    pub sync: SyncOptions,
    pub priority: PriorityWeights,
    /// Initial rule set; replaced at runtime through `SyncEngine::set_priority_rules`
    pub priority_rules: Vec<PriorityRule>,
    pub severity: SeverityPolicy,
    pub retention: RetentionPolicy,
    pub sensitivity: SensitivityPolicy,
    pub logging: LoggerConfig,
}

impl SyncSettings {
    /// Defaults, then `path` if it exists, then `RELIEFWATCH_*` variables
    ///
    /// # Errors
    ///
    /// Parse and validation failures from [`ConfigLoader`].
    pub fn load(path: Option<&Path>) -> config_engine::Result<Self> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = path {
            loader = loader.file(path);
        }
        loader.load_validated()
    }
}

impl Validate for SyncSettings {
    fn validate(&self) -> Result<(), String> {
        if self.database.db_path.as_os_str().is_empty() {
            return Err("database.db_path must be set".to_string());
        }
        if self.database.profile.trim().is_empty() {
            return Err("database.profile must not be blank".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("database.max_connections must be positive".to_string());
        }
        if self.database.max_queue_items == 0 {
            return Err("database.max_queue_items must be positive".to_string());
        }
        if !self.remote.base_url.starts_with("http://") && !self.remote.base_url.starts_with("https://") {
            return Err(format!("remote.base_url is not an http(s) URL: {}", self.remote.base_url));
        }
        if self.remote.timeout_secs == 0 {
            return Err("remote.timeout_secs must be positive".to_string());
        }
        if self.sync.batch_size == 0 {
            return Err("sync.batch_size must be positive".to_string());
        }
        if self.priority.response_volume_threshold < 0.0 {
            return Err("priority.response_volume_threshold must not be negative".to_string());
        }
        if let Some(rule) = self.priority_rules.iter().find(|r| r.id.trim().is_empty()) {
            return Err(format!("priority rule '{}' has no id", rule.name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConflictSeverity, EntityKind};
    use config_engine::ConfigError;

    #[test]
    fn test_defaults_validate() {
        assert!(SyncSettings::default().validate().is_ok());
    }

    #[test]
    fn test_yaml_and_env_layers() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "reliefwatch.yaml",
                r#"
database:
  db_path: /data/field.db
  profile: kano-team
remote:
  base_url: https://sync.example.org/api/v1
severity:
  delete_modify: CRITICAL
priority_rules:
  - id: r1
    name: Flooded wards
    entityType: ASSESSMENT
    priorityModifier: 10
    conditions:
      - field: assessmentType
        operator: EQUALS
        value: WASH
"#,
            )?;
            jail.set_env("RELIEFWATCH_SYNC__MAX_RETRIES", "5");

            let settings = SyncSettings::load(Some(Path::new("reliefwatch.yaml"))).map_err(|e| e.to_string())?;

            assert_eq!(settings.database.profile, "kano-team");
            assert_eq!(settings.database.max_queue_items, 10_000);
            assert_eq!(settings.sync.max_retries, 5);
            assert_eq!(settings.sync.batch_size, 50);
            assert_eq!(settings.severity.delete_modify, ConflictSeverity::Critical);
            assert_eq!(settings.priority_rules.len(), 1);
            assert_eq!(settings.priority_rules[0].entity_type, EntityKind::Assessment);
            assert!(settings.priority_rules[0].is_active);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RELIEFWATCH_REMOTE__BASE_URL", "ftp://sync");
            let result = SyncSettings::load(None);
            assert!(matches!(result, Err(ConfigError::ValidationError(_))));
            Ok(())
        });
    }
}
