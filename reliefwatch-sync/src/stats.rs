//! Counters exposed to the UI and the ops CLI

use crate::models::{
    ConflictSeverity, ConflictStatus, ConflictType, EntityKind, PriorityTier, UpdateStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Optimistic updates held in memory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStats {
    pub total: u64,
    pub by_status: BTreeMap<UpdateStatus, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictStats {
    pub total: u64,
    pub by_status: BTreeMap<ConflictStatus, u64>,
    pub by_type: BTreeMap<ConflictType, u64>,
    pub by_severity: BTreeMap<ConflictSeverity, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total: u64,
    pub by_kind: BTreeMap<EntityKind, u64>,
    pub by_tier: BTreeMap<PriorityTier, u64>,
    /// Items that failed more than `max_retries` times
    pub exhausted: u64,
    /// Items whose payload could not be read on the last scan
    pub unreadable: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub updates: UpdateStats,
    pub conflicts: ConflictStats,
    pub queue: QueueStats,
}
