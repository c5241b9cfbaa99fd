//! Layered configuration loading for the ReliefWatch engine
//!
//! Configuration is resolved in three layers, later layers winning:
//!
//! 1. The type's `Default` implementation
//! 2. YAML or TOML files, in the order they were added
//! 3. Environment variables prefixed with `RELIEFWATCH_`, where `__`
//!    separates nested keys (`RELIEFWATCH_SYNC__MAX_RETRIES=5`)
//!
//! # Example
//!
//! ```rust
//! use config_engine::{ConfigLoader, ConfigSource};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct AppConfig {
//!     database_path: String,
//!     max_retries: u32,
//! }
//!
//! let config: AppConfig = ConfigLoader::new()
//!     .with_source(ConfigSource::inline_yaml("max_retries: 4"))
//!     .load()
//!     .unwrap();
//!
//! assert_eq!(config.max_retries, 4);
//! ```

pub mod engine;
pub mod error;
pub mod providers;
pub mod validation;

pub use engine::ConfigLoader;
pub use error::{ConfigError, Result};
pub use providers::ConfigSource;
pub use validation::Validate;
