use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Error context information
///
/// Holds identifiers only. Payload contents never belong here because the
/// context is written to logs verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    pub operation: Option<String>,
    pub entity_kind: Option<String>,
    pub entity_id: Option<String>,
    pub queue_item_id: Option<String>,
    pub update_id: Option<String>,
    pub conflict_id: Option<String>,
    pub additional: BTreeMap<String, String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_entity(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.entity_kind = Some(kind.into());
        self.entity_id = Some(id.into());
        self
    }

    pub fn with_queue_item(mut self, id: impl ToString) -> Self {
        self.queue_item_id = Some(id.to_string());
        self
    }

    pub fn with_update(mut self, id: impl ToString) -> Self {
        self.update_id = Some(id.to_string());
        self
    }

    pub fn with_conflict(mut self, id: impl ToString) -> Self {
        self.conflict_id = Some(id.to_string());
        self
    }

    pub fn add_context<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.additional.insert(key.into(), value.into());
        self
    }
}
