//! Sync engine
//!
//! Ties the optimistic layer, the durable store, priority scoring and the
//! remote API together. One engine per signed-in device profile; nothing is
//! global, every collaborator is passed in.

use crate::config::SyncSettings;
use crate::conflict_resolution::ConflictResolver;
use crate::error::{SyncConflictError, SyncError, SyncResult, SyncTransientError};
use crate::local_db::{CleanupReport, LocalDatabase, RecordWrite, ResolutionEffects};
use crate::models::{
    ConflictFilter, ConflictRecord, ConflictStatus, ConflictType, EntityKind, MutationAction, MutationPayload,
    NewQueueItem, OptimisticUpdate, PriorityRule, PriorityTier, QueueItem, RecordSyncStatus,
    ResolutionStrategy, UpdateStatus,
};
use crate::optimistic::{OptimisticUpdateManager, UpdateCallbacks};
use crate::priority::PriorityAssigner;
use crate::record_encryption::KeyVault;
use crate::remote::{RemoteError, RemoteMutation, RemoteMutationApi, ServerAck};
use crate::scheduler::{backoff_delay, CancellationToken, Clock};
use crate::session::{Session, SessionProvider};
use crate::stats::EngineStats;
use error_common::{report, ErrorContext};
use parking_lot::RwLock;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// `performedBy` for actions the engine takes on its own
pub const ENGINE_ACTOR: &str = "sync-engine";

/// Outcome counts of one [`SyncEngine::process_queue`] run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessReport {
    pub attempted: u64,
    pub synced: u64,
    /// Transient failures, left queued for retry
    pub failed: u64,
    pub conflicts: u64,
    /// Conflicts both sides agreed on, resolved without a reviewer
    pub auto_resolved: u64,
    pub rejected: u64,
    /// Still inside their backoff window
    pub deferred: u64,
    /// Past `max_retries`, waiting for a rollback
    pub exhausted: u64,
    /// Left in place because their payload could not be read
    pub unreadable: u64,
}

enum Outcome {
    Synced,
    Failed,
    Conflict,
    AutoResolved,
    Rejected,
}

pub struct SyncEngine {
    db: Arc<LocalDatabase>,
    remote: Arc<dyn RemoteMutationApi>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    updates: OptimisticUpdateManager,
    assigner: PriorityAssigner,
    resolver: ConflictResolver,
    rules: RwLock<Vec<PriorityRule>>,
    vault: KeyVault,
    session: RwLock<Option<Session>>,
    shutdown: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        db: Arc<LocalDatabase>,
        remote: Arc<dyn RemoteMutationApi>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
    ) -> Self {
        let updates = OptimisticUpdateManager::new(
            settings.sync.max_retries,
            settings.sync.backoff_base(),
            clock.clone(),
        );
        let vault = KeyVault::for_database(&db);

        Self {
            assigner: PriorityAssigner::new(settings.priority.clone()),
            resolver: ConflictResolver::new(settings.severity.clone()),
            rules: RwLock::new(settings.priority_rules.clone()),
            db,
            remote,
            clock,
            updates,
            vault,
            session: RwLock::new(None),
            shutdown: CancellationToken::new(),
            settings,
        }
    }

    pub fn database(&self) -> &Arc<LocalDatabase> {
        &self.db
    }

    pub fn updates(&self) -> &OptimisticUpdateManager {
        &self.updates
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn priority_rules(&self) -> Vec<PriorityRule> {
        self.rules.read().clone()
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Install the signed-in user's data key and bearer token
    ///
    /// Returns the key fingerprint.
    pub async fn start_session(&self, provider: &dyn SessionProvider) -> SyncResult<String> {
        let session = provider
            .current_session()
            .await?
            .ok_or_else(|| SyncError::Validation("no user is signed in".into()))?;
        session.validate()?;

        let fingerprint = self.vault.open_session(&self.db, &session.user_id).await?;
        info!(user_id = %session.user_id, key_fingerprint = %fingerprint, "Sync session started");
        *self.session.write() = Some(session);
        Ok(fingerprint)
    }

    /// Drop the data key and token; sensitive storage is unusable until the next session
    pub fn end_session(&self) {
        self.vault.close_session(&self.db);
        if let Some(session) = self.session.write().take() {
            info!(user_id = %session.user_id, "Sync session ended");
        }
    }

    fn session_token(&self) -> SyncResult<SecretString> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.session_token.clone())
            .ok_or_else(|| SyncError::KeyUnavailable("no session is open".into()))
    }

    // ========================================================================
    // Optimistic updates
    // ========================================================================

    /// Apply a user edit: projection first, then the record and its queue item
    ///
    /// Edits to an entity with a PENDING conflict are refused with
    /// [`SyncError::Conflict`] until it is resolved. When persisting fails the
    /// update is failed and rolled back in memory before the error is
    /// returned.
    pub async fn apply_optimistic_update(
        &self,
        kind: EntityKind,
        entity_id: &str,
        operation: MutationAction,
        data: Option<MutationPayload>,
        priority: PriorityTier,
        callbacks: UpdateCallbacks,
    ) -> SyncResult<Uuid> {
        if let Some(conflict) = self.pending_conflict(kind, entity_id).await? {
            debug!(conflict_id = %conflict.id, entity_id = entity_id, "Edit refused while conflict is pending");
            return Err(blocked_by(conflict));
        }

        let existing = self.db.get_record(kind, entity_id).await?;
        let base_version = existing.as_ref().and_then(|r| r.server_version);
        let original = existing.as_ref().map(|r| r.payload.clone());

        let id = self.updates.apply_optimistic_update(
            kind,
            entity_id,
            operation,
            data.clone(),
            original,
            callbacks,
        )?;

        let persisted = self
            .persist_update(id, kind, entity_id, operation, data.as_ref(), priority, base_version, existing.is_some())
            .await;

        if let Err(err) = persisted {
            report(
                &err,
                &ErrorContext::new()
                    .with_operation("apply_optimistic_update")
                    .with_entity(kind.as_str(), entity_id)
                    .with_update(id),
            );
            // Back to the original in memory
            let _ = self.updates.fail(id, &err.to_string());
            let _ = self.updates.rollback(id);
            return Err(err);
        }

        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_update(
        &self,
        update_id: Uuid,
        kind: EntityKind,
        entity_id: &str,
        operation: MutationAction,
        data: Option<&MutationPayload>,
        priority: PriorityTier,
        base_version: Option<i64>,
        record_exists: bool,
    ) -> SyncResult<QueueItem> {
        let item = self
            .enqueue_scored(
                NewQueueItem::new(kind, operation, entity_id, data.cloned(), priority)
                    .with_base_version(base_version)
                    .with_update(update_id),
            )
            .await?;

        let written = match (operation, data) {
            (MutationAction::Delete, _) if record_exists => self
                .db
                .set_sync_status(kind, entity_id, RecordSyncStatus::Pending, None)
                .await,
            (MutationAction::Delete, _) => Ok(()),
            (_, Some(payload)) => self
                .db
                .save_record(entity_id, payload, RecordSyncStatus::Pending, None)
                .await
                .map(|_| ()),
            (_, None) => Err(SyncError::Validation(format!("{operation} requires data"))),
        };

        if let Err(err) = written {
            self.db.delete_queue_item(item.id).await?;
            return Err(err);
        }
        Ok(item)
    }

    fn scored(&self, mut new_item: NewQueueItem) -> NewQueueItem {
        let rules = self.priority_rules();
        let now = self.clock.now();
        let preview = new_item.preview(now);
        new_item.priority_score = self.assigner.score_at(&preview, &rules, now);
        new_item.priority_reason = self.assigner.generate_reason_at(&preview, &rules, now);
        new_item
    }

    async fn enqueue_scored(&self, new_item: NewQueueItem) -> SyncResult<QueueItem> {
        self.db.enqueue(self.scored(new_item)).await
    }

    /// Retry a FAILED update after its backoff
    ///
    /// The wait goes through the injected clock and ends early with
    /// [`SyncError::Cancelled`] on shutdown, leaving the update FAILED with
    /// its retry count unchanged. An error during the attempt puts the update
    /// back to FAILED. Updates blocked by a pending conflict are refused;
    /// resolve the conflict instead.
    pub async fn retry_update(&self, id: Uuid) -> SyncResult<OptimisticUpdate> {
        let token = self.session_token()?;
        let update = self
            .updates
            .get(id)
            .ok_or_else(|| SyncError::NotFound(format!("optimistic update {id}")))?;

        if update.status == UpdateStatus::Failed {
            if let Some(conflict) = self.pending_conflict(update.entity_type, &update.entity_id).await? {
                return Err(blocked_by(conflict));
            }
        }

        let backoff = self.updates.retry_backoff(id)?;
        self.clock.sleep(backoff, &self.shutdown).await?;

        let (snapshot, _) = self.updates.begin_retry(id)?;
        if let Err(err) = self.attempt_retry(&snapshot, &token).await {
            report(
                &err,
                &ErrorContext::new()
                    .with_operation("retry_update")
                    .with_entity(snapshot.entity_type.as_str(), snapshot.entity_id.clone())
                    .with_update(id),
            );
            if self.updates.get(id).is_some_and(|u| u.status == UpdateStatus::Pending) {
                let _ = self.updates.fail(id, &err.to_string());
            }
            return Err(err);
        }

        self.updates
            .get(id)
            .ok_or_else(|| SyncError::NotFound(format!("optimistic update {id}")))
    }

    async fn attempt_retry(&self, snapshot: &OptimisticUpdate, token: &SecretString) -> SyncResult<Outcome> {
        let id = snapshot.id;
        let item = match self.db.queue_item_for_update(id).await? {
            Some(item) => item,
            None => {
                let base_version = self
                    .db
                    .get_record(snapshot.entity_type, &snapshot.entity_id)
                    .await?
                    .and_then(|r| r.server_version);
                self.enqueue_scored(
                    NewQueueItem::new(
                        snapshot.entity_type,
                        snapshot.operation,
                        snapshot.entity_id.clone(),
                        snapshot.optimistic_data.clone(),
                        PriorityTier::Normal,
                    )
                    .with_base_version(base_version)
                    .with_update(id),
                )
                .await?
            }
        };

        self.attempt(&item, token).await
    }

    /// Undo a FAILED update in the store, then in memory
    ///
    /// The record goes back to its original data as SYNCED, or disappears if
    /// the update was a create, and the update's queue items are dropped, all
    /// in one transaction. If that fails the update stays FAILED and can be
    /// rolled back again.
    pub async fn rollback_update(&self, id: Uuid) -> SyncResult<OptimisticUpdate> {
        let update = self
            .updates
            .get(id)
            .ok_or_else(|| SyncError::NotFound(format!("optimistic update {id}")))?;
        if update.status != UpdateStatus::Failed {
            return Err(SyncError::InvalidTransition(format!(
                "cannot roll back update {id} in state {}",
                update.status
            )));
        }

        let dropped = self
            .db
            .restore_record(update.entity_type, &update.entity_id, update.original_data.as_ref(), id)
            .await
            .map_err(|err| {
                report(
                    &err,
                    &ErrorContext::new()
                        .with_operation("rollback_update")
                        .with_entity(update.entity_type.as_str(), update.entity_id.clone())
                        .with_update(id),
                );
                err
            })?;
        let rolled_back = self.updates.rollback(id)?;

        info!(
            update_id = %id,
            entity_kind = ?rolled_back.entity_type,
            entity_id = %rolled_back.entity_id,
            dropped_queue_items = dropped,
            "Rolled back update"
        );
        Ok(rolled_back)
    }

    /// Roll back every FAILED update; returns how many were rolled back
    pub async fn rollback_all_failed(&self) -> SyncResult<usize> {
        let mut rolled_back = 0;
        for update in self.updates.list(Some(UpdateStatus::Failed)) {
            self.rollback_update(update.id).await?;
            rolled_back += 1;
        }
        Ok(rolled_back)
    }

    // ========================================================================
    // Queue processing
    // ========================================================================

    /// Drain the queue in priority order
    ///
    /// Scores are recomputed and persisted first. Items inside their backoff
    /// window and items past `max_retries` are left in place. At most
    /// `batch_size` items are submitted.
    pub async fn process_queue(&self) -> SyncResult<ProcessReport> {
        let token = self.session_token()?;
        if self.shutdown.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let (ordered, unreadable) = self.rescore_queue().await?;
        let now = self.clock.now();
        let max_retries = self.settings.sync.max_retries;
        let mut report = ProcessReport {
            unreadable,
            ..ProcessReport::default()
        };

        for item in ordered {
            if self.shutdown.is_cancelled() {
                break;
            }
            if report.attempted >= self.settings.sync.batch_size as u64 {
                break;
            }

            if item.retry_count > max_retries {
                report.exhausted += 1;
                continue;
            }
            if item.retry_count > 0 {
                let wait = backoff_delay(self.settings.sync.backoff_base(), item.retry_count - 1);
                let due = item
                    .last_attempt
                    .and_then(|at| chrono::Duration::from_std(wait).ok().map(|w| at + w));
                if due.is_some_and(|due| due > now) {
                    report.deferred += 1;
                    continue;
                }
            }

            if let Some(update_id) = item.update_id {
                if !self.ready_for_attempt(update_id) {
                    report.exhausted += 1;
                    continue;
                }
            }

            report.attempted += 1;
            match self.attempt(&item, &token).await? {
                Outcome::Synced => report.synced += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Conflict => report.conflicts += 1,
                Outcome::AutoResolved => report.auto_resolved += 1,
                Outcome::Rejected => report.rejected += 1,
            }
        }

        info!(
            attempted = report.attempted,
            synced = report.synced,
            failed = report.failed,
            conflicts = report.conflicts,
            deferred = report.deferred,
            exhausted = report.exhausted,
            unreadable = report.unreadable,
            "Processed sync queue"
        );
        Ok(report)
    }

    /// Move a FAILED update back to PENDING for a queue-driven attempt
    ///
    /// Updates unknown to this process (for example after a restart) are
    /// attempted without optimistic bookkeeping.
    fn ready_for_attempt(&self, update_id: Uuid) -> bool {
        match self.updates.get(update_id).map(|u| u.status) {
            Some(UpdateStatus::Failed) => self.updates.begin_retry(update_id).is_ok(),
            Some(UpdateStatus::Pending) | None => true,
            Some(UpdateStatus::Confirmed | UpdateStatus::RolledBack) => false,
        }
    }

    async fn attempt(&self, item: &QueueItem, token: &SecretString) -> SyncResult<Outcome> {
        let data = item
            .payload
            .as_ref()
            .map(MutationPayload::to_value)
            .transpose()?;

        let mutation = RemoteMutation {
            idempotency_key: item.id,
            kind: item.kind,
            action: item.action,
            entity_id: item.entity_id.clone(),
            base_version: item.base_version,
            data: data.clone(),
            session_token: token.clone(),
        };

        debug!(queue_item_id = %item.id, entity_kind = ?item.kind, action = %item.action, "Submitting mutation");

        match self.remote.submit(&mutation).await {
            Ok(ack) => {
                self.on_synced(item, ack).await?;
                Ok(Outcome::Synced)
            }
            Err(RemoteError::Transient(message)) => {
                let attempted = self.db.record_attempt(item.id, &message).await?;
                report(
                    &SyncError::Transient(SyncTransientError {
                        message: message.clone(),
                        attempts: attempted.retry_count,
                    }),
                    &context("process_queue", item),
                );
                self.fail_update(item, &message);
                Ok(Outcome::Failed)
            }
            Err(err @ RemoteError::VersionConflict { .. }) => self.on_conflict(item, data, &err).await,
            Err(RemoteError::Rejected { status, message }) => {
                self.db.delete_queue_item(item.id).await?;
                self.mark_record(item.kind, &item.entity_id, RecordSyncStatus::Failed, None)
                    .await?;
                let reason = format!("rejected by server ({status}): {message}");
                warn!(queue_item_id = %item.id, status, "Mutation rejected");
                self.fail_update(item, &reason);
                Ok(Outcome::Rejected)
            }
        }
    }

    async fn on_synced(&self, item: &QueueItem, ack: ServerAck) -> SyncResult<()> {
        self.db.delete_queue_item(item.id).await?;

        if item.action == MutationAction::Delete {
            self.db.delete_record(item.kind, &item.entity_id).await?;
        } else {
            let canonical = ack
                .data
                .clone()
                .and_then(|data| MutationPayload::from_value(item.kind, data).ok());
            match canonical {
                Some(payload) => {
                    self.db
                        .save_record(&item.entity_id, &payload, RecordSyncStatus::Synced, Some(ack.version))
                        .await?;
                }
                None => {
                    self.mark_record(item.kind, &item.entity_id, RecordSyncStatus::Synced, Some(ack.version))
                        .await?;
                }
            }
        }

        if let Some(update_id) = item.update_id {
            if self.updates.get(update_id).is_some() {
                self.updates.confirm(update_id, ack.data)?;
            }
        }

        debug!(queue_item_id = %item.id, server_version = ack.version, "Mutation synced");
        Ok(())
    }

    async fn on_conflict(
        &self,
        item: &QueueItem,
        local_data: Option<serde_json::Value>,
        err: &RemoteError,
    ) -> SyncResult<Outcome> {
        let server = err.server_state().unwrap_or_default();
        let new_conflict = self.resolver.build_conflict(
            item.kind,
            &item.entity_id,
            item.action,
            item.base_version,
            local_data,
            &server,
            ENGINE_ACTOR,
        );
        let conflict = self.db.create_conflict(new_conflict).await?;
        self.db.delete_queue_item(item.id).await?;

        report(
            &SyncError::Conflict(SyncConflictError {
                entity_kind: item.kind,
                entity_id: item.entity_id.clone(),
                local_version: item.base_version,
                server_version: server.version,
                conflict_id: Some(conflict.id),
            }),
            &context("process_queue", item).with_conflict(conflict.id),
        );

        if ConflictResolver::can_auto_resolve(conflict.conflict_type) {
            let effects = ResolutionEffects {
                records: vec![RecordWrite::Delete {
                    kind: item.kind,
                    entity_id: item.entity_id.clone(),
                }],
                queue: Vec::new(),
            };
            self.db
                .apply_resolution(
                    conflict.id,
                    ResolutionStrategy::AutoMerged,
                    ENGINE_ACTOR,
                    Some("both sides deleted the entity"),
                    effects,
                )
                .await?;
            if let Some(update_id) = item.update_id {
                if self.updates.get(update_id).is_some() {
                    self.updates.confirm(update_id, None)?;
                }
            }
            return Ok(Outcome::AutoResolved);
        }

        self.mark_record(item.kind, &item.entity_id, RecordSyncStatus::Conflict, None)
            .await?;
        self.fail_update(item, &format!("conflict {} ({})", conflict.id, conflict.conflict_type));
        Ok(Outcome::Conflict)
    }

    /// Set a record's status; a record that is not stored locally is fine
    async fn mark_record(
        &self,
        kind: EntityKind,
        entity_id: &str,
        status: RecordSyncStatus,
        server_version: Option<i64>,
    ) -> SyncResult<()> {
        match self.db.set_sync_status(kind, entity_id, status, server_version).await {
            Ok(()) | Err(SyncError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn fail_update(&self, item: &QueueItem, error: &str) {
        let Some(update_id) = item.update_id else {
            return;
        };
        if self.updates.get(update_id).is_some_and(|u| u.status == UpdateStatus::Pending) {
            let _ = self.updates.fail(update_id, error);
        }
    }

    // ========================================================================
    // Conflicts
    // ========================================================================

    pub async fn get_pending_conflicts(&self, filter: &ConflictFilter) -> SyncResult<Vec<ConflictRecord>> {
        self.db.get_pending_conflicts(filter).await
    }

    pub async fn get_conflicts_for_entity(&self, entity_id: &str) -> SyncResult<Vec<ConflictRecord>> {
        self.db.get_conflicts_for_entity(entity_id).await
    }

    /// Record a resolution without touching the entity's data
    pub async fn update_conflict_resolution(
        &self,
        id: Uuid,
        strategy: ResolutionStrategy,
        resolved_by: &str,
        justification: Option<&str>,
    ) -> SyncResult<ConflictRecord> {
        self.db
            .update_conflict_resolution(id, strategy, resolved_by, justification)
            .await
    }

    /// Resolve a conflict and apply the chosen data
    ///
    /// - `ACCEPT_LOCAL` re-queues the local version against the server version
    /// - `ACCEPT_REMOTE` stores the server version (or deletes locally)
    /// - `CUSTOM_MERGE` stores `merged` and queues it
    /// - `KEEP_BOTH` stores the server version and queues the local data as a new entity
    ///
    /// The data changes and the resolution commit in one transaction; when
    /// two resolvers race, the loser gets `InvalidTransition` and writes
    /// nothing. `AUTO_MERGED` is reserved for the engine.
    pub async fn resolve_conflict(
        &self,
        id: Uuid,
        strategy: ResolutionStrategy,
        resolved_by: &str,
        justification: Option<&str>,
        merged: Option<MutationPayload>,
    ) -> SyncResult<ConflictRecord> {
        let conflict = self
            .db
            .get_conflict(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("conflict {id}")))?;

        if conflict.status == ConflictStatus::Resolved {
            return Err(SyncError::InvalidTransition(format!("conflict {id} is already resolved")));
        }
        if resolved_by.trim().is_empty() {
            return Err(SyncError::Validation("resolvedBy is required".into()));
        }

        let kind = conflict.entity_type;
        let mut effects = ResolutionEffects::default();
        let mut copy_id = None;
        match strategy {
            ResolutionStrategy::AutoMerged => {
                return Err(SyncError::Validation(
                    "AUTO_MERGED is applied by the engine only".into(),
                ));
            }
            ResolutionStrategy::AcceptLocal => self.accept_local(&conflict, &mut effects)?,
            ResolutionStrategy::AcceptRemote => accept_remote(&conflict, &mut effects)?,
            ResolutionStrategy::CustomMerge => {
                let merged = merged.ok_or_else(|| {
                    SyncError::Validation("CUSTOM_MERGE requires merged data".into())
                })?;
                if merged.kind() != kind {
                    return Err(SyncError::Validation(format!(
                        "merged {} data for a {kind} conflict",
                        merged.kind()
                    )));
                }
                effects.records.push(RecordWrite::Save {
                    entity_id: conflict.entity_id.clone(),
                    payload: merged.clone(),
                    status: RecordSyncStatus::Pending,
                    server_version: conflict.remote_version,
                });
                effects.queue.push(self.scored(
                    NewQueueItem::new(kind, MutationAction::Update, conflict.entity_id.clone(), Some(merged), PriorityTier::Normal)
                        .with_base_version(conflict.remote_version),
                ));
            }
            ResolutionStrategy::KeepBoth => {
                accept_remote(&conflict, &mut effects)?;
                if let Some(local) = local_payload(&conflict)? {
                    let new_id = Uuid::new_v4().to_string();
                    effects.records.push(RecordWrite::Save {
                        entity_id: new_id.clone(),
                        payload: local.clone(),
                        status: RecordSyncStatus::Pending,
                        server_version: None,
                    });
                    effects.queue.push(self.scored(NewQueueItem::new(
                        kind,
                        MutationAction::Create,
                        new_id.clone(),
                        Some(local),
                        PriorityTier::Normal,
                    )));
                    copy_id = Some(new_id);
                }
            }
        }

        let resolved = self
            .db
            .apply_resolution(id, strategy, resolved_by, justification, effects)
            .await?;
        if let Some(copy_id) = copy_id {
            info!(conflict_id = %id, copy_entity_id = %copy_id, "Kept local version as new entity");
        }
        Ok(resolved)
    }

    fn accept_local(&self, conflict: &ConflictRecord, effects: &mut ResolutionEffects) -> SyncResult<()> {
        let kind = conflict.entity_type;
        let remote_gone = remote_deleted(conflict);

        let item = match local_payload(conflict)? {
            Some(local) => {
                effects.records.push(RecordWrite::Save {
                    entity_id: conflict.entity_id.clone(),
                    payload: local.clone(),
                    status: RecordSyncStatus::Pending,
                    server_version: conflict.remote_version,
                });
                let action = if remote_gone { MutationAction::Create } else { MutationAction::Update };
                let base = if remote_gone { None } else { conflict.remote_version };
                NewQueueItem::new(kind, action, conflict.entity_id.clone(), Some(local), PriorityTier::Normal)
                    .with_base_version(base)
            }
            None => NewQueueItem::new(kind, MutationAction::Delete, conflict.entity_id.clone(), None, PriorityTier::Normal)
                .with_base_version(conflict.remote_version),
        };

        effects.queue.push(self.scored(item));
        Ok(())
    }

    async fn pending_conflict(&self, kind: EntityKind, entity_id: &str) -> SyncResult<Option<ConflictRecord>> {
        Ok(self
            .db
            .get_conflicts_for_entity(entity_id)
            .await?
            .into_iter()
            .find(|c| c.entity_type == kind && c.status == ConflictStatus::Pending))
    }

    // ========================================================================
    // Priorities, stats and housekeeping
    // ========================================================================

    /// Replace the rule set and re-score the persisted queue
    pub async fn set_priority_rules(&self, rules: Vec<PriorityRule>) -> SyncResult<Vec<QueueItem>> {
        info!(rules = rules.len(), "Priority rules replaced");
        *self.rules.write() = rules;
        self.recalculate_queue_priorities().await
    }

    /// Re-score the queue, persist the scores and return it in processing order
    ///
    /// Unreadable rows are left out.
    pub async fn recalculate_queue_priorities(&self) -> SyncResult<Vec<QueueItem>> {
        Ok(self.rescore_queue().await?.0)
    }

    async fn rescore_queue(&self) -> SyncResult<(Vec<QueueItem>, u64)> {
        let rules = self.priority_rules();
        let scan = self.db.scan_queue().await?;
        let ordered = self
            .assigner
            .recalculate_queue_priorities(scan.items, &rules, self.clock.now());
        self.db.update_queue_priorities(&ordered).await?;
        Ok((ordered, scan.unreadable.len() as u64))
    }

    pub async fn stats(&self) -> SyncResult<EngineStats> {
        Ok(EngineStats {
            updates: self.updates.stats(),
            conflicts: self.db.conflict_stats().await?,
            queue: self.db.queue_stats(self.settings.sync.max_retries).await?,
        })
    }

    /// Apply the retention policy and forget settled updates
    pub async fn cleanup(&self) -> SyncResult<CleanupReport> {
        let report = self.db.cleanup(&self.settings.retention).await?;
        let pruned = self.updates.prune_confirmed();
        debug!(pruned, "Pruned settled optimistic updates");
        Ok(report)
    }

    /// Cancel pending backoff waits; never blocks
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        info!("Sync engine shutting down");
    }
}

/// The server no longer holds the entity
///
/// A delete/modify conflict where the local side still has data means the
/// server deleted it; with no local data, the local side was the delete.
fn remote_deleted(conflict: &ConflictRecord) -> bool {
    match conflict.conflict_type {
        ConflictType::ConcurrentDelete => true,
        ConflictType::DeleteModify => conflict.local_data.is_some(),
        ConflictType::VersionMismatch | ConflictType::ConcurrentModification => false,
    }
}

fn blocked_by(conflict: ConflictRecord) -> SyncError {
    SyncConflictError {
        entity_kind: conflict.entity_type,
        entity_id: conflict.entity_id,
        local_version: conflict.local_version,
        server_version: conflict.remote_version,
        conflict_id: Some(conflict.id),
    }
    .into()
}

/// Store the server's version, or delete locally if the server has none
fn accept_remote(conflict: &ConflictRecord, effects: &mut ResolutionEffects) -> SyncResult<()> {
    let kind = conflict.entity_type;
    if remote_deleted(conflict) {
        effects.records.push(RecordWrite::Delete {
            kind,
            entity_id: conflict.entity_id.clone(),
        });
        return Ok(());
    }

    let remote = conflict.remote_data.clone().ok_or_else(|| {
        SyncError::Validation(format!(
            "conflict {} has no server data to accept",
            conflict.id
        ))
    })?;
    effects.records.push(RecordWrite::Save {
        entity_id: conflict.entity_id.clone(),
        payload: MutationPayload::from_value(kind, remote)?,
        status: RecordSyncStatus::Synced,
        server_version: conflict.remote_version,
    });
    Ok(())
}

fn local_payload(conflict: &ConflictRecord) -> SyncResult<Option<MutationPayload>> {
    conflict
        .local_data
        .clone()
        .map(|data| MutationPayload::from_value(conflict.entity_type, data))
        .transpose()
}

fn context(operation: &str, item: &QueueItem) -> ErrorContext {
    ErrorContext::new()
        .with_operation(operation)
        .with_entity(item.kind.as_str(), item.entity_id.clone())
        .with_queue_item(item.id)
}
