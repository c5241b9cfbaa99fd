//! Error types for the sync engine

use crate::models::EntityKind;
use crypto::CryptoError;
use error_common::{codes, Categorized, ErrorCategory};
use thiserror::Error;
use uuid::Uuid;

/// SQLite primary result code for "database or disk is full"
const SQLITE_FULL: &str = "13";

/// A sync attempt failed in a way that may succeed later
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transient sync failure after {attempts} attempt(s): {message}")]
pub struct SyncTransientError {
    pub message: String,
    pub attempts: u32,
}

/// Local and server state for an entity diverged
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("version conflict on {entity_kind} {entity_id} (local base {local_version:?}, server {server_version:?})")]
pub struct SyncConflictError {
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub local_version: Option<i64>,
    pub server_version: Option<i64>,
    pub conflict_id: Option<Uuid>,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Encryption key unavailable: {0}")]
    KeyUnavailable(String),

    #[error(transparent)]
    Transient(#[from] SyncTransientError),

    #[error(transparent)]
    Conflict(#[from] SyncConflictError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage quota exceeded: {0}")]
    StorageQuota(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Retries exhausted for update {id} after {retry_count} retries")]
    RetriesExhausted { id: Uuid, retry_count: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some(SQLITE_FULL) {
                return SyncError::StorageQuota(db_err.message().to_string());
            }
        }
        SyncError::Database(err)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<CryptoError> for SyncError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed
            | CryptoError::InvalidFormat(_)
            | CryptoError::UnsupportedKeyVersion { .. } => SyncError::Decryption(err.to_string()),
            other => SyncError::Crypto(other.to_string()),
        }
    }
}

impl Categorized for SyncError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Decryption(_) | Self::KeyUnavailable(_) | Self::Crypto(_) => ErrorCategory::Crypto,
            Self::Transient(_) => ErrorCategory::Network,
            Self::Conflict(_) => ErrorCategory::Conflict,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::StorageQuota(_) | Self::NotFound(_) | Self::Database(_) | Self::Serialization(_) => {
                ErrorCategory::Storage
            }
            Self::InvalidTransition(_) | Self::RetriesExhausted { .. } | Self::Cancelled => {
                ErrorCategory::State
            }
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Decryption(_) => codes::crypto::DECRYPTION_FAILED,
            Self::KeyUnavailable(_) => codes::crypto::KEY_UNAVAILABLE,
            Self::Crypto(_) => codes::crypto::OPERATION_FAILED,
            Self::Transient(_) => codes::sync::TRANSIENT,
            Self::Conflict(_) => codes::sync::VERSION_CONFLICT,
            Self::Validation(_) => codes::validation::INVALID_PAYLOAD,
            Self::StorageQuota(_) => codes::storage::QUOTA_EXCEEDED,
            Self::NotFound(_) => codes::storage::NOT_FOUND,
            Self::Database(_) => codes::storage::QUERY_FAILED,
            Self::Serialization(_) => codes::storage::SERIALIZATION,
            Self::InvalidTransition(_) => codes::sync::INVALID_TRANSITION,
            Self::RetriesExhausted { .. } => codes::sync::RETRIES_EXHAUSTED,
            Self::Cancelled => codes::sync::CANCELLED,
            Self::Internal(_) => codes::internal::UNEXPECTED,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decryption_errors_map_to_decryption() {
        let err: SyncError = CryptoError::DecryptionFailed.into();
        assert!(matches!(err, SyncError::Decryption(_)));
        assert_eq!(err.code(), codes::crypto::DECRYPTION_FAILED);

        let err: SyncError = CryptoError::InvalidFormat("bad".into()).into();
        assert!(matches!(err, SyncError::Decryption(_)));
    }

    #[test]
    fn test_only_transient_is_retryable() {
        let transient = SyncError::Transient(SyncTransientError {
            message: "timeout".into(),
            attempts: 1,
        });
        assert!(transient.is_retryable());
        assert!(!SyncError::Validation("missing name".into()).is_retryable());
        assert!(!SyncError::StorageQuota("full".into()).is_retryable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(SyncError::Cancelled.category(), ErrorCategory::State);
        assert_eq!(
            SyncError::KeyUnavailable("no session".into()).category(),
            ErrorCategory::Crypto
        );
        assert_eq!(
            SyncError::StorageQuota("queue full".into()).category(),
            ErrorCategory::Storage
        );
    }
}
