pub mod config;
pub mod redactor;

pub use config::LoggerConfig;
pub use redactor::{PiiRedactor, RedactionConfig};

use error_common::{Categorized, ErrorCategory};
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Tracing setup and PII redaction for the ReliefWatch engine
///
/// Field teams record names, phone numbers and exact GPS positions of
/// affected households. None of that may reach a log file in the clear, so
/// anything free-form (server error bodies, record summaries) goes through
/// [`PiiRedactor`] before it is logged.
///
/// # Detected Data Types
///
/// - **Email Addresses**: `amina@example.org` → `EMAIL[hash]`
/// - **Phone Numbers**: `+234 803 123 4567` → `PHONE[hash]`
/// - **GPS Coordinates**: `9.0820, 8.6753` → `GPS[hash]`
/// - **IP Addresses**: `10.0.0.12` → `IP[hash]`
///
/// # Example
///
/// ```rust
/// use logger_redacted::{LoggerConfig, PiiRedactor};
///
/// let config = LoggerConfig::default();
/// let redactor = PiiRedactor::from_logger_config(&config);
///
/// let line = redactor.redact("assessor reachable at amina@example.org");
/// assert!(!line.contains("amina@example.org"));
/// ```
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Invalid log filter '{directive}': {message}")]
    InvalidFilter { directive: String, message: String },

    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,
}

impl Categorized for LoggerError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }

    fn code(&self) -> &'static str {
        error_common::codes::configuration::LOAD_FAILED
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `config.level` when it is set. Human-readable output
/// is the default; `config.json` switches to one JSON object per line.
///
/// # Errors
///
/// Returns [`LoggerError::InvalidFilter`] for an unparsable level directive
/// and [`LoggerError::AlreadyInitialized`] if a subscriber is already set.
pub fn init_tracing(config: &LoggerConfig) -> Result<(), LoggerError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| LoggerError::InvalidFilter {
            directive: config.level.clone(),
            message: e.to_string(),
        })?,
    };

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .json(),
            )
            .try_init()
            .map_err(|_| LoggerError::AlreadyInitialized)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_level(true),
            )
            .try_init()
            .map_err(|_| LoggerError::AlreadyInitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_reported() {
        // RUST_LOG takes precedence, so only meaningful when it is unset
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggerConfig {
            level: "reliefwatch=loudest".to_string(),
            ..LoggerConfig::default()
        };
        assert!(matches!(
            init_tracing(&config),
            Err(LoggerError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggerConfig {
            level: "warn".to_string(),
            json: true,
            ..LoggerConfig::default()
        };
        let _ = init_tracing(&config);
        assert!(matches!(
            init_tracing(&config),
            Err(LoggerError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            LoggerError::AlreadyInitialized.category(),
            ErrorCategory::Configuration
        );
    }
}
