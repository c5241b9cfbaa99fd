use super::{EntityKind, MutationAction, MutationPayload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

wire_enum! {
    /// Lifecycle of an optimistic update
    ///
    /// `Confirmed` and `RolledBack` are terminal.
    pub enum UpdateStatus {
        Pending => "PENDING",
        Confirmed => "CONFIRMED",
        Failed => "FAILED",
        RolledBack => "ROLLED_BACK",
    }
}

impl UpdateStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::RolledBack)
    }
}

/// A mutation already applied to the in-memory view, awaiting the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimisticUpdate {
    pub id: Uuid,
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub operation: MutationAction,
    /// `None` for deletes
    pub optimistic_data: Option<MutationPayload>,
    /// State before the mutation, `None` for creates. Never modified.
    pub original_data: Option<MutationPayload>,
    pub status: UpdateStatus,
    pub retry_count: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Canonical server version once confirmed
    pub server_data: Option<Value>,
}
