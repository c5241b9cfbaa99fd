use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification shared by every error enum in the workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Malformed input, surfaced to the caller immediately
    Validation,
    /// Local durable store failures (including quota)
    Storage,
    /// Encryption, decryption and key management
    Crypto,
    /// Remote sync failures that may succeed on retry
    Network,
    /// Local and server state diverged
    Conflict,
    /// An operation was attempted in a state that does not allow it
    State,
    /// Configuration loading or validation
    Configuration,
    /// Anything else
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Storage => "storage",
            Self::Crypto => "crypto",
            Self::Network => "network",
            Self::Conflict => "conflict",
            Self::State => "state",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by crate error enums so they can be reported uniformly
pub trait Categorized: fmt::Display {
    /// Coarse category of the failure
    fn category(&self) -> ErrorCategory;

    /// Stable error code from [`crate::codes`]
    fn code(&self) -> &'static str;

    /// Whether the failed operation may succeed if attempted again unchanged
    fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Network)
    }
}
