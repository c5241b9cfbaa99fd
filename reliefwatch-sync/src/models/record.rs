use super::{EntityKind, MutationPayload, RecordSyncStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A field record as held in the local store, decrypted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord {
    pub kind: EntityKind,
    pub entity_id: String,
    pub payload: MutationPayload,
    pub sync_status: RecordSyncStatus,
    pub server_version: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// Query over one record table
///
/// Status and date range are pushed into SQL; the sub-type predicate runs
/// after decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    pub kind: EntityKind,
    pub status: Option<RecordSyncStatus>,
    pub modified_after: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
    /// Assessment type, response type, incident type, MIME type or entity type
    pub sub_type: Option<String>,
}

impl RecordFilter {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            status: None,
            modified_after: None,
            modified_before: None,
            sub_type: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: RecordSyncStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn modified_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.modified_after = after;
        self.modified_before = before;
        self
    }

    #[must_use]
    pub fn with_sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.sub_type = Some(sub_type.into());
        self
    }
}

/// An unsubmitted form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub id: Uuid,
    pub kind: EntityKind,
    pub entity_id: Option<String>,
    pub payload: MutationPayload,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}
