//! Optimistic updates
//!
//! A mutation is applied to the in-memory entity projection as soon as the
//! user makes it, and settled later by the sync engine:
//!
//! ```text
//! PENDING ──confirm──▶ CONFIRMED
//!    │
//!    └──fail──▶ FAILED ──begin_retry──▶ PENDING
//!                  │
//!                  └──rollback──▶ ROLLED_BACK
//! ```
//!
//! CONFIRMED and ROLLED_BACK are terminal. Callbacks run after the internal
//! lock is released, exactly once per transition.

use crate::error::{SyncError, SyncResult};
use crate::models::{EntityKind, MutationAction, MutationPayload, OptimisticUpdate, UpdateStatus};
use crate::scheduler::{backoff_delay, Clock};
use crate::stats::UpdateStats;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub type UpdateCallback = Arc<dyn Fn(&OptimisticUpdate) + Send + Sync>;

/// UI hooks for one update
#[derive(Clone, Default)]
pub struct UpdateCallbacks {
    on_success: Option<UpdateCallback>,
    on_error: Option<UpdateCallback>,
    on_rollback: Option<UpdateCallback>,
}

impl UpdateCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_success(mut self, f: impl Fn(&OptimisticUpdate) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&OptimisticUpdate) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_rollback(mut self, f: impl Fn(&OptimisticUpdate) + Send + Sync + 'static) -> Self {
        self.on_rollback = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for UpdateCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateCallbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_rollback", &self.on_rollback.is_some())
            .finish()
    }
}

struct Tracked {
    update: OptimisticUpdate,
    callbacks: UpdateCallbacks,
    /// Insertion order, for stable listing
    order: u64,
}

impl Tracked {
    /// Pair the callback with a snapshot to fire once the lock is released
    ///
    /// Each caller has already checked and changed the status under the
    /// lock, so a transition can only be taken once.
    fn notification(&self, callback: Option<UpdateCallback>) -> Option<(UpdateCallback, OptimisticUpdate)> {
        callback.map(|cb| (cb, self.update.clone()))
    }
}

#[derive(Default)]
struct State {
    updates: HashMap<Uuid, Tracked>,
    /// Current projected data per entity; `None` means deleted or absent
    projection: HashMap<(EntityKind, String), Option<MutationPayload>>,
    next_order: u64,
}

impl State {
    fn tracked_mut(&mut self, id: Uuid) -> SyncResult<&mut Tracked> {
        self.updates
            .get_mut(&id)
            .ok_or_else(|| SyncError::NotFound(format!("optimistic update {id}")))
    }
}

pub struct OptimisticUpdateManager {
    state: Mutex<State>,
    max_retries: u32,
    backoff_base: Duration,
    clock: Arc<dyn Clock>,
}

fn fire(notification: Option<(UpdateCallback, OptimisticUpdate)>) {
    if let Some((callback, snapshot)) = notification {
        callback(&snapshot);
    }
}

impl OptimisticUpdateManager {
    pub fn new(max_retries: u32, backoff_base: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_retries,
            backoff_base,
            clock,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Apply a mutation to the projection and start tracking it
    pub fn apply_optimistic_update(
        &self,
        kind: EntityKind,
        entity_id: &str,
        operation: MutationAction,
        optimistic: Option<MutationPayload>,
        original: Option<MutationPayload>,
        callbacks: UpdateCallbacks,
    ) -> SyncResult<Uuid> {
        if entity_id.trim().is_empty() {
            return Err(SyncError::Validation("entity id is required".into()));
        }
        match (&optimistic, operation) {
            (None, MutationAction::Delete) => {}
            (None, _) => {
                return Err(SyncError::Validation(format!("{operation} requires data")));
            }
            (Some(payload), _) => {
                payload.validate()?;
                if payload.kind() != kind {
                    return Err(SyncError::Validation(format!(
                        "{} data applied to {kind}",
                        payload.kind()
                    )));
                }
            }
        }

        let id = Uuid::new_v4();
        let now = self.clock.now();
        let update = OptimisticUpdate {
            id,
            entity_type: kind,
            entity_id: entity_id.to_string(),
            operation,
            optimistic_data: optimistic.clone(),
            original_data: original,
            status: UpdateStatus::Pending,
            retry_count: 0,
            error: None,
            created_at: now,
            updated_at: now,
            server_data: None,
        };

        let mut state = self.state.lock();
        let order = state.next_order;
        state.next_order += 1;
        state.projection.insert((kind, entity_id.to_string()), optimistic);
        state.updates.insert(
            id,
            Tracked {
                update,
                callbacks,
                order,
            },
        );
        drop(state);

        tracing::debug!(update_id = %id, entity_kind = ?kind, entity_id = entity_id, "Applied optimistic update");
        Ok(id)
    }

    /// PENDING → CONFIRMED with the server's canonical data
    pub fn confirm(&self, id: Uuid, server_data: Option<Value>) -> SyncResult<OptimisticUpdate> {
        let now = self.clock.now();
        let (snapshot, notification) = {
            let mut state = self.state.lock();
            let tracked = state.tracked_mut(id)?;
            expect_status(&tracked.update, UpdateStatus::Pending, "confirm")?;

            tracked.update.status = UpdateStatus::Confirmed;
            tracked.update.server_data = server_data;
            tracked.update.error = None;
            tracked.update.updated_at = now;
            let callback = tracked.callbacks.on_success.clone();
            let notification = tracked.notification(callback);
            (tracked.update.clone(), notification)
        };

        tracing::debug!(update_id = %id, "Optimistic update confirmed");
        fire(notification);
        Ok(snapshot)
    }

    /// PENDING → FAILED
    pub fn fail(&self, id: Uuid, error: &str) -> SyncResult<OptimisticUpdate> {
        let now = self.clock.now();
        let (snapshot, notification) = {
            let mut state = self.state.lock();
            let tracked = state.tracked_mut(id)?;
            expect_status(&tracked.update, UpdateStatus::Pending, "fail")?;

            tracked.update.status = UpdateStatus::Failed;
            tracked.update.error = Some(error.to_string());
            tracked.update.updated_at = now;
            let callback = tracked.callbacks.on_error.clone();
            let notification = tracked.notification(callback);
            (tracked.update.clone(), notification)
        };

        tracing::warn!(update_id = %id, retry_count = snapshot.retry_count, error = error, "Optimistic update failed");
        fire(notification);
        Ok(snapshot)
    }

    /// The wait before the next retry of a FAILED update, without starting it
    pub fn retry_backoff(&self, id: Uuid) -> SyncResult<Duration> {
        let mut state = self.state.lock();
        let tracked = state.tracked_mut(id)?;
        self.check_retry(&tracked.update)?;
        Ok(backoff_delay(self.backoff_base, tracked.update.retry_count))
    }

    /// FAILED → PENDING, returning the backoff to wait before the attempt
    ///
    /// The wait is `base * 2^retry_count` with the count before this retry.
    pub fn begin_retry(&self, id: Uuid) -> SyncResult<(OptimisticUpdate, Duration)> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let tracked = state.tracked_mut(id)?;
        self.check_retry(&tracked.update)?;

        let backoff = backoff_delay(self.backoff_base, tracked.update.retry_count);
        tracked.update.retry_count += 1;
        tracked.update.status = UpdateStatus::Pending;
        tracked.update.updated_at = now;

        let snapshot = tracked.update.clone();
        drop(state);

        tracing::debug!(update_id = %id, retry_count = snapshot.retry_count, backoff_ms = backoff.as_millis(), "Retrying optimistic update");
        Ok((snapshot, backoff))
    }

    /// FAILED → ROLLED_BACK, restoring the original data in the projection
    pub fn rollback(&self, id: Uuid) -> SyncResult<OptimisticUpdate> {
        let now = self.clock.now();
        let (snapshot, notification) = {
            let mut state = self.state.lock();
            let tracked = state.tracked_mut(id)?;
            expect_status(&tracked.update, UpdateStatus::Failed, "roll back")?;

            tracked.update.status = UpdateStatus::RolledBack;
            tracked.update.updated_at = now;
            let callback = tracked.callbacks.on_rollback.clone();
            let notification = tracked.notification(callback);
            let snapshot = tracked.update.clone();

            state.projection.insert(
                (snapshot.entity_type, snapshot.entity_id.clone()),
                snapshot.original_data.clone(),
            );
            (snapshot, notification)
        };

        tracing::info!(update_id = %id, entity_id = %snapshot.entity_id, "Rolled back optimistic update");
        fire(notification);
        Ok(snapshot)
    }

    /// Roll back every FAILED update; returns how many were rolled back
    pub fn rollback_all_failed(&self) -> usize {
        let failed: Vec<Uuid> = self.list(Some(UpdateStatus::Failed)).iter().map(|u| u.id).collect();
        failed.into_iter().filter(|id| self.rollback(*id).is_ok()).count()
    }

    /// Projected data for an entity this manager has touched
    ///
    /// `Some(None)` means the entity is projected as deleted or absent.
    pub fn entity_state(&self, kind: EntityKind, entity_id: &str) -> Option<Option<MutationPayload>> {
        self.state
            .lock()
            .projection
            .get(&(kind, entity_id.to_string()))
            .cloned()
    }

    pub fn get(&self, id: Uuid) -> Option<OptimisticUpdate> {
        self.state.lock().updates.get(&id).map(|t| t.update.clone())
    }

    /// Updates in the order they were applied
    pub fn list(&self, status: Option<UpdateStatus>) -> Vec<OptimisticUpdate> {
        let state = self.state.lock();
        let mut tracked: Vec<&Tracked> = state
            .updates
            .values()
            .filter(|t| status.map_or(true, |s| t.update.status == s))
            .collect();
        tracked.sort_by_key(|t| t.order);
        tracked.into_iter().map(|t| t.update.clone()).collect()
    }

    /// Forget updates in a terminal state; returns how many were dropped
    pub fn prune_confirmed(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.updates.len();
        state.updates.retain(|_, t| !t.update.status.is_terminal());
        before - state.updates.len()
    }

    pub fn stats(&self) -> UpdateStats {
        let state = self.state.lock();
        let mut stats = UpdateStats::default();
        for tracked in state.updates.values() {
            stats.total += 1;
            *stats.by_status.entry(tracked.update.status).or_default() += 1;
        }
        stats
    }

    fn check_retry(&self, update: &OptimisticUpdate) -> SyncResult<()> {
        expect_status(update, UpdateStatus::Failed, "retry")?;
        if update.retry_count >= self.max_retries {
            return Err(SyncError::RetriesExhausted {
                id: update.id,
                retry_count: update.retry_count,
            });
        }
        Ok(())
    }
}

fn expect_status(update: &OptimisticUpdate, expected: UpdateStatus, verb: &str) -> SyncResult<()> {
    if update.status == expected {
        return Ok(());
    }
    Err(SyncError::InvalidTransition(format!(
        "cannot {verb} update {} in state {}",
        update.id, update.status
    )))
}
