//! Hash-chained audit trail for conflicts
//!
//! Each conflict carries its own chain:
//! - Sequence numbers start at 1 and have no gaps
//! - The first entry links to the genesis hash `"0"`
//! - Every later entry links to the previous entry's hash
//! - Timestamps strictly increase; a new entry is stamped at
//!   `max(now, last + 1ms)`
//!
//! Rewriting or deleting any entry breaks [`verify_chain`].

use crate::local_db::{format_ts, truncate_millis};
use crate::models::{AuditAction, ConflictAuditEntry};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// `prev_hash` of the first entry in every chain
pub const GENESIS_HASH: &str = "0";

/// Calculate cryptographic hash of an entry from all fields except `entry_hash`
pub fn compute_entry_hash(
    conflict_id: Uuid,
    sequence: i64,
    timestamp: &DateTime<Utc>,
    action: AuditAction,
    performed_by: &str,
    details: &Value,
    prev_hash: &str,
) -> String {
    let mut hasher = Sha256::new();

    hasher.update(conflict_id.to_string().as_bytes());
    hasher.update(sequence.to_string().as_bytes());
    hasher.update(format_ts(timestamp).as_bytes());
    hasher.update(action.as_str().as_bytes());
    hasher.update(performed_by.as_bytes());
    hasher.update(details.to_string().as_bytes());
    hasher.update(prev_hash.as_bytes());

    format!("{:x}", hasher.finalize())
}

/// Timestamp for the next entry, strictly after `last`
pub fn next_timestamp(now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = truncate_millis(now);
    match last {
        Some(last) if now <= last => last + Duration::milliseconds(1),
        _ => now,
    }
}

/// Build the entry following `previous` (or the first entry when `None`)
pub fn next_entry(
    conflict_id: Uuid,
    previous: Option<&ConflictAuditEntry>,
    now: DateTime<Utc>,
    action: AuditAction,
    performed_by: &str,
    details: Value,
) -> ConflictAuditEntry {
    let sequence = previous.map_or(1, |p| p.sequence + 1);
    let prev_hash = previous.map_or_else(|| GENESIS_HASH.to_string(), |p| p.entry_hash.clone());
    let timestamp = next_timestamp(now, previous.map(|p| p.timestamp));
    let entry_hash = compute_entry_hash(
        conflict_id,
        sequence,
        &timestamp,
        action,
        performed_by,
        &details,
        &prev_hash,
    );

    ConflictAuditEntry {
        sequence,
        conflict_id,
        timestamp,
        action,
        performed_by: performed_by.to_string(),
        details,
        prev_hash,
        entry_hash,
    }
}

/// Result of checking one conflict's chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditVerification {
    pub conflict_id: Uuid,
    pub valid: bool,
    pub entries: usize,
    /// First entry that fails a check
    pub first_invalid_sequence: Option<i64>,
    pub reason: Option<String>,
}

/// Verify linkage, hashes, sequence numbers and timestamp order
pub fn verify_chain(conflict_id: Uuid, entries: &[ConflictAuditEntry]) -> AuditVerification {
    let mut expected_prev = GENESIS_HASH.to_string();
    let mut last_timestamp: Option<DateTime<Utc>> = None;

    let failure = |sequence: i64, reason: &str| AuditVerification {
        conflict_id,
        valid: false,
        entries: entries.len(),
        first_invalid_sequence: Some(sequence),
        reason: Some(reason.to_string()),
    };

    for (expected_sequence, entry) in (1_i64..).zip(entries) {
        if entry.conflict_id != conflict_id {
            return failure(entry.sequence, "entry belongs to another conflict");
        }
        if entry.sequence != expected_sequence {
            return failure(entry.sequence, "sequence gap");
        }
        if entry.prev_hash != expected_prev {
            return failure(entry.sequence, "broken link to previous entry");
        }
        if last_timestamp.is_some_and(|last| entry.timestamp <= last) {
            return failure(entry.sequence, "timestamp not after previous entry");
        }

        let calculated = compute_entry_hash(
            entry.conflict_id,
            entry.sequence,
            &entry.timestamp,
            entry.action,
            &entry.performed_by,
            &entry.details,
            &entry.prev_hash,
        );
        if calculated != entry.entry_hash {
            return failure(entry.sequence, "entry hash mismatch");
        }

        expected_prev = entry.entry_hash.clone();
        last_timestamp = Some(entry.timestamp);
    }

    AuditVerification {
        conflict_id,
        valid: true,
        entries: entries.len(),
        first_invalid_sequence: None,
        reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn chain() -> (Uuid, Vec<ConflictAuditEntry>) {
        let id = Uuid::new_v4();
        let now = Utc.with_ymd_and_hms(2026, 9, 1, 6, 0, 0).unwrap();

        let first = next_entry(id, None, now, AuditAction::ConflictDetected, "sync-engine", json!({"conflictType": "VERSION_MISMATCH"}));
        // Same wall-clock instant still yields a later timestamp
        let second = next_entry(id, Some(&first), now, AuditAction::ConflictResolved, "coordinator-7", json!({"strategy": "ACCEPT_REMOTE"}));
        (id, vec![first, second])
    }

    #[test]
    fn test_chain_links_and_orders() {
        let (id, entries) = chain();
        assert_eq!(entries[0].prev_hash, GENESIS_HASH);
        assert_eq!(entries[1].prev_hash, entries[0].entry_hash);
        assert_eq!(entries[1].sequence, 2);
        assert!(entries[1].timestamp > entries[0].timestamp);

        let verification = verify_chain(id, &entries);
        assert!(verification.valid);
        assert_eq!(verification.entries, 2);
    }

    #[test]
    fn test_tampered_details_detected() {
        let (id, mut entries) = chain();
        entries[1].details = json!({"strategy": "ACCEPT_LOCAL"});

        let verification = verify_chain(id, &entries);
        assert!(!verification.valid);
        assert_eq!(verification.first_invalid_sequence, Some(2));
    }

    #[test]
    fn test_removed_entry_detected() {
        let (id, entries) = chain();
        let verification = verify_chain(id, &entries[1..]);
        assert!(!verification.valid);
        assert_eq!(verification.first_invalid_sequence, Some(2));
    }

    #[test]
    fn test_empty_chain_is_valid() {
        assert!(verify_chain(Uuid::new_v4(), &[]).valid);
    }

    #[test]
    fn test_next_timestamp() {
        let last = Utc.with_ymd_and_hms(2026, 9, 1, 6, 0, 0).unwrap();
        assert_eq!(next_timestamp(last - Duration::seconds(5), Some(last)), last + Duration::milliseconds(1));
        assert_eq!(next_timestamp(last + Duration::seconds(5), Some(last)), last + Duration::seconds(5));
    }
}
