use crate::error::{ConfigError, Result};
use crate::providers::ConfigSource;
use crate::validation::Validate;
use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

/// Environment prefix used when no explicit env source is configured
pub const DEFAULT_ENV_PREFIX: &str = "RELIEFWATCH_";

/// Builds a layered configuration from defaults, files and environment
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    sources: Vec<ConfigSource>,
    include_default_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            include_default_env: true,
        }
    }

    /// Add an optional YAML/TOML file layer
    #[must_use]
    pub fn file(self, path: impl Into<std::path::PathBuf>) -> Self {
        self.with_source(ConfigSource::file(path))
    }

    #[must_use]
    pub fn with_source(mut self, source: ConfigSource) -> Self {
        if matches!(source, ConfigSource::Env { .. }) {
            self.include_default_env = false;
        }
        self.sources.push(source);
        self
    }

    /// Skip the implicit `RELIEFWATCH_` environment layer
    #[must_use]
    pub fn without_env(mut self) -> Self {
        self.include_default_env = false;
        self
    }

    /// Resolve all layers into `T`
    ///
    /// # Errors
    ///
    /// Fails when a required file is missing, a file has an unknown
    /// extension, or the merged layers do not deserialize into `T`.
    pub fn load<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        let figment = self.figment(&T::default())?;
        Ok(figment.extract()?)
    }

    /// Resolve all layers and run [`Validate::validate`] on the result
    ///
    /// # Errors
    ///
    /// As [`ConfigLoader::load`], plus [`ConfigError::ValidationError`].
    pub fn load_validated<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Serialize + Default + Validate,
    {
        let config: T = self.load()?;
        config.validate().map_err(ConfigError::ValidationError)?;
        Ok(config)
    }

    fn figment<T: Serialize>(&self, defaults: &T) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(defaults));

        for source in &self.sources {
            figment = match source {
                ConfigSource::File { path, required } => {
                    if !path.exists() {
                        if *required {
                            return Err(ConfigError::SourceNotFound(path.clone()));
                        }
                        debug!(path = %path.display(), "Optional config file not present");
                        continue;
                    }
                    let extension = path
                        .extension()
                        .and_then(|e| e.to_str())
                        .map(str::to_ascii_lowercase);
                    match extension.as_deref() {
                        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                        Some("toml") => figment.merge(Toml::file(path)),
                        _ => return Err(ConfigError::UnsupportedFormat(path.clone())),
                    }
                }
                ConfigSource::InlineYaml(text) => figment.merge(Yaml::string(text)),
                ConfigSource::Env { prefix } => figment.merge(Env::prefixed(prefix).split("__")),
            };
        }

        if self.include_default_env {
            figment = figment.merge(Env::prefixed(DEFAULT_ENV_PREFIX).split("__"));
        }

        Ok(figment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct SyncSection {
        max_retries: u32,
        batch_size: u32,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct TestConfig {
        database_path: String,
        sync: SyncSection,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            Self {
                database_path: "reliefwatch.db".to_string(),
                sync: SyncSection {
                    max_retries: 3,
                    batch_size: 50,
                },
            }
        }
    }

    impl Validate for TestConfig {
        fn validate(&self) -> std::result::Result<(), String> {
            if self.sync.batch_size == 0 {
                return Err("sync.batch_size must be positive".to_string());
            }
            Ok(())
        }
    }

    #[test]
    fn test_defaults_only() {
        figment::Jail::expect_with(|_jail| {
            let config: TestConfig = ConfigLoader::new().load().map_err(|e| e.to_string())?;
            assert_eq!(config, TestConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env_layering() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "reliefwatch.yaml",
                "database_path: /data/field.db\nsync:\n  max_retries: 5\n",
            )?;
            jail.set_env("RELIEFWATCH_SYNC__MAX_RETRIES", "7");

            let config: TestConfig = ConfigLoader::new()
                .file("reliefwatch.yaml")
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.database_path, "/data/field.db");
            assert_eq!(config.sync.max_retries, 7);
            assert_eq!(config.sync.batch_size, 50);
            Ok(())
        });
    }

    #[test]
    fn test_toml_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("reliefwatch.toml", "[sync]\nbatch_size = 10\n")?;

            let config: TestConfig = ConfigLoader::new()
                .file("reliefwatch.toml")
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.sync.batch_size, 10);
            Ok(())
        });
    }

    #[test]
    fn test_missing_optional_file_is_skipped() {
        figment::Jail::expect_with(|_jail| {
            let config: TestConfig = ConfigLoader::new()
                .file("absent.yaml")
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.sync.max_retries, 3);
            Ok(())
        });
    }

    #[test]
    fn test_missing_required_file_fails() {
        figment::Jail::expect_with(|_jail| {
            let result: Result<TestConfig> = ConfigLoader::new()
                .with_source(ConfigSource::required_file("absent.yaml"))
                .load();
            assert!(matches!(result, Err(ConfigError::SourceNotFound(_))));
            Ok(())
        });
    }

    #[test]
    fn test_unsupported_extension() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("reliefwatch.ini", "max_retries=2")?;
            let result: Result<TestConfig> = ConfigLoader::new().file("reliefwatch.ini").load();
            assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
            Ok(())
        });
    }

    #[test]
    fn test_validation_failure() {
        figment::Jail::expect_with(|_jail| {
            let result: Result<TestConfig> = ConfigLoader::new()
                .with_source(ConfigSource::inline_yaml("sync:\n  batch_size: 0\n"))
                .load_validated();
            assert!(matches!(result, Err(ConfigError::ValidationError(_))));
            Ok(())
        });
    }

    #[test]
    fn test_custom_env_prefix_replaces_default() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RELIEFWATCH_SYNC__BATCH_SIZE", "1");
            jail.set_env("FIELD_SYNC__BATCH_SIZE", "25");

            let config: TestConfig = ConfigLoader::new()
                .with_source(ConfigSource::env("FIELD_"))
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.sync.batch_size, 25);
            Ok(())
        });
    }

    #[test]
    fn test_type_mismatch_is_parse_error() {
        figment::Jail::expect_with(|_jail| {
            let result: Result<TestConfig> = ConfigLoader::new()
                .with_source(ConfigSource::inline_yaml("sync:\n  max_retries: many\n"))
                .load();
            assert!(matches!(result, Err(ConfigError::ParseError(_))));
            Ok(())
        });
    }
}
