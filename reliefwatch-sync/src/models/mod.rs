//! Domain types shared by the store, the optimistic layer and the engine
//!
//! Every enum here travels over the wire and into SQLite as its
//! `SCREAMING_SNAKE_CASE` name, so `as_str`/`FromStr` are the single source
//! of truth for both.

/// Declares a wire enum with `as_str`, `ALL`, `Display` and `FromStr`
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        $vis enum $name {
            $($(#[$vmeta])* #[serde(rename = $wire)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::error::SyncError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(crate::error::SyncError::Validation(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

pub mod conflict;
pub mod optimistic;
pub mod payload;
pub mod queue;
pub mod record;
pub mod rules;

pub use conflict::{
    AuditAction, ConflictAuditEntry, ConflictDiff, ConflictFilter, ConflictRecord,
    ConflictSeverity, ConflictStatus, ConflictType, NewConflict, ResolutionStrategy,
};
pub use optimistic::{OptimisticUpdate, UpdateStatus};
pub use payload::{
    AssessmentPayload, AssessmentType, EntityPayload, GeoPoint, IncidentPayload, MediaPayload,
    MutationPayload, ResponseItem, ResponsePayload, Severity,
};
pub use queue::{NewQueueItem, QueueItem};
pub use record::{Draft, LocalRecord, RecordFilter};
pub use rules::{PriorityRule, RuleCondition, RuleOperator};

wire_enum! {
    /// Kind of field record being mutated
    pub enum EntityKind {
        Assessment => "ASSESSMENT",
        Response => "RESPONSE",
        Incident => "INCIDENT",
        Media => "MEDIA",
        Entity => "ENTITY",
    }
}

impl EntityKind {
    /// Local table holding records of this kind
    pub fn table(&self) -> &'static str {
        match self {
            Self::Assessment => "assessments",
            Self::Response => "responses",
            Self::Incident => "incidents",
            Self::Media => "media",
            Self::Entity => "entities",
        }
    }

    /// Path segment used by the sync API
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Assessment => "assessment",
            Self::Response => "response",
            Self::Incident => "incident",
            Self::Media => "media",
            Self::Entity => "entity",
        }
    }
}

wire_enum! {
    pub enum MutationAction {
        Create => "CREATE",
        Update => "UPDATE",
        Delete => "DELETE",
    }
}

wire_enum! {
    /// Priority requested by the submitter
    pub enum PriorityTier {
        High => "HIGH",
        Normal => "NORMAL",
        Low => "LOW",
    }
}

wire_enum! {
    /// Sync state of a locally stored record
    pub enum RecordSyncStatus {
        Pending => "PENDING",
        Synced => "SYNCED",
        Failed => "FAILED",
        Conflict => "CONFLICT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_wire_names() {
        assert_eq!(EntityKind::Assessment.as_str(), "ASSESSMENT");
        assert_eq!(
            serde_json::to_string(&PriorityTier::High).unwrap(),
            "\"HIGH\""
        );
        assert_eq!(
            MutationAction::from_str("DELETE").unwrap(),
            MutationAction::Delete
        );
    }

    #[test]
    fn test_unknown_name_is_validation_error() {
        assert!(matches!(
            EntityKind::from_str("PATIENT"),
            Err(crate::error::SyncError::Validation(_))
        ));
    }

    #[test]
    fn test_every_kind_has_distinct_table() {
        let mut tables: Vec<_> = EntityKind::ALL.iter().map(EntityKind::table).collect();
        tables.sort_unstable();
        tables.dedup();
        assert_eq!(tables.len(), EntityKind::ALL.len());
    }
}
