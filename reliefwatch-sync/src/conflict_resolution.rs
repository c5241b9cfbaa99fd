//! Conflict detection and classification
//!
//! Provides:
//! - Classification of a rejected mutation against the server's state
//! - Field-level diffs for side-by-side review
//! - Configurable severity per conflict type and entity kind

use crate::models::{
    ConflictDiff, ConflictSeverity, ConflictType, EntityKind, MutationAction, NewConflict,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the server holds for an entity, as reported with a version conflict
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerState {
    pub version: Option<i64>,
    #[serde(default)]
    pub deleted: bool,
    pub data: Option<Value>,
}

pub struct ConflictDetector;

impl ConflictDetector {
    /// How a mutation based on `base_version` diverges from `server`, if at all
    pub fn classify(
        action: MutationAction,
        base_version: Option<i64>,
        server: &ServerState,
    ) -> Option<ConflictType> {
        let server_exists = server.version.is_some() && !server.deleted;

        match action {
            MutationAction::Delete if server.deleted => Some(ConflictType::ConcurrentDelete),
            MutationAction::Delete if server_exists && base_version != server.version => {
                Some(ConflictType::DeleteModify)
            }
            MutationAction::Delete => None,
            _ if server.deleted => Some(ConflictType::DeleteModify),
            MutationAction::Create if server_exists => Some(ConflictType::ConcurrentModification),
            _ => match (base_version, server.version) {
                (Some(base), Some(current)) if base != current => Some(ConflictType::VersionMismatch),
                (None, Some(_)) => Some(ConflictType::ConcurrentModification),
                _ => None,
            },
        }
    }

    /// Differences between two JSON documents, keyed by dot-separated path
    ///
    /// Objects are walked recursively; arrays and scalars compare as a whole.
    /// A field missing on one side shows as `null` there.
    pub fn compute_diffs(local: &Value, remote: &Value) -> Vec<ConflictDiff> {
        let mut diffs = Vec::new();
        diff_into(&mut diffs, String::new(), local, remote);
        diffs
    }
}

fn diff_into(diffs: &mut Vec<ConflictDiff>, path: String, local: &Value, remote: &Value) {
    match (local, remote) {
        (Value::Object(l), Value::Object(r)) => {
            let mut keys: Vec<&String> = l.keys().chain(r.keys().filter(|k| !l.contains_key(*k))).collect();
            keys.sort();

            for key in keys {
                let child = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                let lv = l.get(key).unwrap_or(&Value::Null);
                let rv = r.get(key).unwrap_or(&Value::Null);
                if lv != rv {
                    diff_into(diffs, child, lv, rv);
                }
            }
        }
        _ if local != remote => diffs.push(ConflictDiff {
            field_path: if path.is_empty() { "$".to_string() } else { path },
            local_value: local.clone(),
            remote_value: remote.clone(),
        }),
        _ => {}
    }
}

/// Severity by conflict type, adjusted by entity kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityPolicy {
    pub version_mismatch: ConflictSeverity,
    pub concurrent_modification: ConflictSeverity,
    pub delete_modify: ConflictSeverity,
    pub concurrent_delete: ConflictSeverity,
    /// Kinds raised one level
    pub critical_kinds: Vec<EntityKind>,
    /// Kinds lowered one level
    pub minor_kinds: Vec<EntityKind>,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            version_mismatch: ConflictSeverity::Low,
            concurrent_modification: ConflictSeverity::Medium,
            delete_modify: ConflictSeverity::High,
            concurrent_delete: ConflictSeverity::Low,
            critical_kinds: vec![EntityKind::Incident, EntityKind::Response],
            minor_kinds: vec![EntityKind::Media],
        }
    }
}

impl SeverityPolicy {
    pub fn severity_for(&self, conflict_type: ConflictType, kind: EntityKind) -> ConflictSeverity {
        let base = match conflict_type {
            ConflictType::VersionMismatch => self.version_mismatch,
            ConflictType::ConcurrentModification => self.concurrent_modification,
            ConflictType::DeleteModify => self.delete_modify,
            ConflictType::ConcurrentDelete => self.concurrent_delete,
        };

        if self.critical_kinds.contains(&kind) {
            base.raised()
        } else if self.minor_kinds.contains(&kind) {
            base.lowered()
        } else {
            base
        }
    }
}

/// Turns a rejected mutation into a conflict record ready to persist
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    severity: SeverityPolicy,
}

impl ConflictResolver {
    pub fn new(severity: SeverityPolicy) -> Self {
        Self { severity }
    }

    pub fn severity_policy(&self) -> &SeverityPolicy {
        &self.severity
    }

    /// Build the conflict for a mutation the server refused
    ///
    /// The server has already declared a conflict, so when the versions
    /// alone do not explain it the type falls back to `VERSION_MISMATCH`.
    #[allow(clippy::too_many_arguments)]
    pub fn build_conflict(
        &self,
        kind: EntityKind,
        entity_id: &str,
        action: MutationAction,
        base_version: Option<i64>,
        local_data: Option<Value>,
        server: &ServerState,
        detected_by: &str,
    ) -> NewConflict {
        let conflict_type = ConflictDetector::classify(action, base_version, server)
            .unwrap_or(ConflictType::VersionMismatch);
        let diffs = match (&local_data, &server.data) {
            (Some(local), Some(remote)) => ConflictDetector::compute_diffs(local, remote),
            _ => Vec::new(),
        };

        NewConflict {
            entity_id: entity_id.to_string(),
            entity_type: kind,
            conflict_type,
            severity: self.severity.severity_for(conflict_type, kind),
            local_version: base_version,
            remote_version: server.version,
            local_data,
            remote_data: server.data.clone(),
            diffs,
            detected_by: detected_by.to_string(),
        }
    }

    /// Both sides agree on the outcome, no human decision is needed
    pub fn can_auto_resolve(conflict_type: ConflictType) -> bool {
        matches!(conflict_type, ConflictType::ConcurrentDelete)
    }
}
