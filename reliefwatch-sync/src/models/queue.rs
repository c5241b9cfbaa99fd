use super::{EntityKind, MutationAction, MutationPayload, PriorityTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A mutation waiting to be pushed to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: Uuid,
    /// Store-assigned insertion order, used for FIFO tie-breaking
    pub sequence: i64,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub action: MutationAction,
    pub entity_id: String,
    pub payload: Option<MutationPayload>,
    pub priority: PriorityTier,
    pub priority_score: u8,
    pub priority_reason: String,
    /// Failed attempts so far
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_modified: DateTime<Utc>,
    pub last_error: Option<String>,
    /// Server version the mutation was based on
    pub base_version: Option<i64>,
    /// Optimistic update this item settles
    pub update_id: Option<Uuid>,
}

/// Input for [`crate::LocalDatabase::enqueue`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueItem {
    pub kind: EntityKind,
    pub action: MutationAction,
    pub entity_id: String,
    pub payload: Option<MutationPayload>,
    pub priority: PriorityTier,
    pub priority_score: u8,
    pub priority_reason: String,
    pub base_version: Option<i64>,
    pub update_id: Option<Uuid>,
}

impl NewQueueItem {
    pub fn new(
        kind: EntityKind,
        action: MutationAction,
        entity_id: impl Into<String>,
        payload: Option<MutationPayload>,
        priority: PriorityTier,
    ) -> Self {
        Self {
            kind,
            action,
            entity_id: entity_id.into(),
            payload,
            priority,
            priority_score: 0,
            priority_reason: String::new(),
            base_version: None,
            update_id: None,
        }
    }

    #[must_use]
    pub fn with_base_version(mut self, version: Option<i64>) -> Self {
        self.base_version = version;
        self
    }

    #[must_use]
    pub fn with_update(mut self, update_id: Uuid) -> Self {
        self.update_id = Some(update_id);
        self
    }

    /// How the item will look once stored, for scoring before insertion
    pub fn preview(&self, now: DateTime<Utc>) -> QueueItem {
        QueueItem {
            id: Uuid::nil(),
            sequence: 0,
            kind: self.kind,
            action: self.action,
            entity_id: self.entity_id.clone(),
            payload: self.payload.clone(),
            priority: self.priority,
            priority_score: self.priority_score,
            priority_reason: self.priority_reason.clone(),
            retry_count: 0,
            created_at: now,
            last_attempt: None,
            last_modified: now,
            last_error: None,
            base_version: self.base_version,
            update_id: self.update_id,
        }
    }
}
