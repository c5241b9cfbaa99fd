use super::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

wire_enum! {
    /// How local and server state diverged
    pub enum ConflictType {
        /// The server moved past the version the local edit was based on
        VersionMismatch => "VERSION_MISMATCH",
        /// Both sides wrote the entity with no common base version
        ConcurrentModification => "CONCURRENT_MODIFICATION",
        /// One side deleted, the other modified
        DeleteModify => "DELETE_MODIFY",
        /// Both sides deleted
        ConcurrentDelete => "CONCURRENT_DELETE",
    }
}

wire_enum! {
    pub enum ConflictSeverity {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Critical => "CRITICAL",
    }
}

impl ConflictSeverity {
    #[must_use]
    pub fn raised(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }

    #[must_use]
    pub fn lowered(self) -> Self {
        match self {
            Self::Critical => Self::High,
            Self::High => Self::Medium,
            Self::Medium | Self::Low => Self::Low,
        }
    }
}

wire_enum! {
    pub enum ConflictStatus {
        Pending => "PENDING",
        Resolved => "RESOLVED",
    }
}

wire_enum! {
    pub enum ResolutionStrategy {
        AcceptLocal => "ACCEPT_LOCAL",
        AcceptRemote => "ACCEPT_REMOTE",
        KeepBoth => "KEEP_BOTH",
        CustomMerge => "CUSTOM_MERGE",
        AutoMerged => "AUTO_MERGED",
    }
}

wire_enum! {
    pub enum AuditAction {
        ConflictDetected => "CONFLICT_DETECTED",
        ConflictResolved => "CONFLICT_RESOLVED",
    }
}

/// A field whose value differs between the local and server versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDiff {
    /// Dot-separated path into the payload
    pub field_path: String,
    pub local_value: Value,
    pub remote_value: Value,
}

/// One link of a conflict's hash-chained audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictAuditEntry {
    pub sequence: i64,
    pub conflict_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub performed_by: String,
    pub details: Value,
    pub prev_hash: String,
    pub entry_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub id: Uuid,
    pub entity_id: String,
    pub entity_type: EntityKind,
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    pub status: ConflictStatus,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_strategy: Option<ResolutionStrategy>,
    pub resolved_by: Option<String>,
    pub justification: Option<String>,
    pub local_version: Option<i64>,
    pub remote_version: Option<i64>,
    pub local_data: Option<Value>,
    pub remote_data: Option<Value>,
    pub diffs: Vec<ConflictDiff>,
    pub audit_trail: Vec<ConflictAuditEntry>,
}

/// Input for [`crate::LocalDatabase::create_conflict`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewConflict {
    pub entity_id: String,
    pub entity_type: EntityKind,
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    pub local_version: Option<i64>,
    pub remote_version: Option<i64>,
    pub local_data: Option<Value>,
    pub remote_data: Option<Value>,
    pub diffs: Vec<ConflictDiff>,
    /// Recorded as `performedBy` on the detection audit entry
    pub detected_by: String,
}

/// Filters for pending conflicts; all set fields must match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictFilter {
    pub entity_type: Option<EntityKind>,
    pub severity: Option<ConflictSeverity>,
    pub conflict_type: Option<ConflictType>,
}

impl ConflictFilter {
    pub fn matches(&self, conflict: &ConflictRecord) -> bool {
        self.entity_type.map_or(true, |t| t == conflict.entity_type)
            && self.severity.map_or(true, |s| s == conflict.severity)
            && self.conflict_type.map_or(true, |c| c == conflict.conflict_type)
    }
}
