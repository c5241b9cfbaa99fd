use error_common::{codes, Categorized, ErrorCategory};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Unsupported configuration format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Configuration parsing failed: {0}")]
    ParseError(Box<figment::Error>),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::ParseError(Box::new(err))
    }
}

impl Categorized for ConfigError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::ValidationError(_) => ErrorCategory::Validation,
            _ => ErrorCategory::Configuration,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => codes::validation::INVALID_PAYLOAD,
            _ => codes::configuration::LOAD_FAILED,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
