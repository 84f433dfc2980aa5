//! # Sync Coordinator
//!
//! Runs sync sessions: drains the local store to the authority one record at
//! a time, or reconciles whole-state snapshots.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         One Sync Session                                │
//! │                                                                         │
//! │  sync() / sync_bulk()                                                  │
//! │       │                                                                 │
//! │       ├── session lock taken? ──────────────► Err(AlreadySyncing)      │
//! │       ├── authority unreachable? ───────────► SyncResult ["offline"]   │
//! │       ▼                                                                 │
//! │  INCREMENTAL                          BULK                             │
//! │  requeue failed (< max_attempts)      pull snapshot                    │
//! │  list_pending()                       decode + list_pending()          │
//! │  for each record:                     merge (local wins)               │
//! │    cancelled? ──► ["cancelled"]       encode + push snapshot           │
//! │    push ──► mark_synced               commit_bulk (one transaction)    │
//! │         └─► mark_failed + recheck                                      │
//! │                 └─ offline? stop                                       │
//! │       │                                     │                          │
//! │       └──────────────┬──────────────────────┘                          │
//! │                      ▼                                                  │
//! │  last_sync_time, prune, progress Completed|Failed ──► Idle             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation of a record is a single committed statement, so a crash
//! between two pushes leaves exactly the unpushed records pending.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use ts_rs::TS;

use fieldstock_core::{
    merge, EntityKind, EntityPayload, MergeError, ProgressSnapshot, Record, Snapshot, SyncMode,
    SyncPhase, SyncResult, OFFLINE_ERROR,
};
use fieldstock_db::{Database, DbError};

use crate::connectivity::ConnectivityMonitor;
use crate::error::{EngineResult, SyncError, TransportError};
use crate::progress::{ProgressListener, ProgressReporter};
use crate::remote::RemoteSyncClient;

/// Steps of a bulk session as reported to progress observers.
const BULK_STEPS: u32 = 4;

// =============================================================================
// Options / Stats
// =============================================================================

/// Tunables for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Failed records with fewer attempts are re-queued at session start.
    pub max_attempts: u32,

    /// Delete synced records after a successful session.
    pub prune_synced: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        CoordinatorOptions {
            max_attempts: 10,
            prune_synced: true,
        }
    }
}

/// Engine state for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct EngineStats {
    pub pending_count: i64,
    pub pending_by_kind: BTreeMap<EntityKind, i64>,
    pub failed_count: i64,
    #[ts(as = "Option<String>")]
    pub last_sync_time: Option<DateTime<Utc>>,
    pub is_online: bool,
    pub is_syncing: bool,
}

// =============================================================================
// Sync Coordinator
// =============================================================================

/// Owns the sync session lifecycle. Share it behind an `Arc`.
pub struct SyncCoordinator {
    db: Database,
    remote: Arc<dyn RemoteSyncClient>,
    connectivity: Arc<ConnectivityMonitor>,
    progress: ProgressReporter,
    options: CoordinatorOptions,
    session: Mutex<()>,
    syncing: AtomicBool,
    cancel_requested: AtomicBool,
    closed: AtomicBool,
    last_result: RwLock<Option<SyncResult>>,
}

impl SyncCoordinator {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteSyncClient>,
        connectivity: Arc<ConnectivityMonitor>,
        progress: ProgressReporter,
        options: CoordinatorOptions,
    ) -> Self {
        SyncCoordinator {
            db,
            remote,
            connectivity,
            progress,
            options,
            session: Mutex::new(()),
            syncing: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            last_result: RwLock::new(None),
        }
    }

    // =========================================================================
    // Inbound API
    // =========================================================================

    /// Validates and queues a wire-shaped payload.
    ///
    /// A `schema_version` field in `value` is honoured; older versions are
    /// upgraded, newer ones rejected.
    pub async fn enqueue(&self, kind: EntityKind, value: serde_json::Value) -> EngineResult<Record> {
        let payload = EntityPayload::from_wire(kind, value)?;
        self.enqueue_payload(payload).await
    }

    /// Validates and queues a typed payload.
    pub async fn enqueue_payload(&self, payload: EntityPayload) -> EngineResult<Record> {
        payload.validate()?;
        let record = self.db.records().enqueue(&payload).await?;
        debug!(record_id = %record.id, kind = %record.entity_kind, "Record queued");
        Ok(record)
    }

    pub async fn stats(&self) -> EngineResult<EngineStats> {
        let store = self.db.records().stats().await?;
        Ok(EngineStats {
            pending_count: store.pending_count,
            pending_by_kind: store.pending_by_kind,
            failed_count: store.failed_count,
            last_sync_time: store.last_sync_time,
            is_online: self.connectivity.is_reachable(),
            is_syncing: self.is_syncing(),
        })
    }

    /// Moves every failed record back to pending. Returns how many moved.
    pub async fn retry_failed(&self) -> EngineResult<u64> {
        let moved = self.db.records().retry_all_failed().await?;
        info!(count = moved, "Failed records re-queued by operator");
        Ok(moved)
    }

    pub fn subscribe_progress(&self, listener: impl ProgressListener + 'static) {
        self.progress.subscribe(listener);
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.current()
    }

    pub fn last_result(&self) -> Option<SyncResult> {
        self.last_result
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Requests cancellation of the running session. Observed at record
    /// boundaries and between bulk steps.
    pub fn cancel(&self) {
        if self.is_syncing() {
            info!("Sync cancellation requested");
            self.cancel_requested.store(true, Ordering::SeqCst);
        }
    }

    /// Stops accepting sessions, cancels the running one and waits for it
    /// to settle its current record. Call before closing the database.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel_requested.store(true, Ordering::SeqCst);
        let _idle = self.session.lock().await;
        info!("Sync coordinator stopped");
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Runs an incremental session.
    pub async fn sync(&self) -> EngineResult<SyncResult> {
        self.sync_incremental().await
    }

    pub async fn sync_incremental(&self) -> EngineResult<SyncResult> {
        self.run_session(SyncMode::Incremental).await
    }

    pub async fn sync_bulk(&self) -> EngineResult<SyncResult> {
        self.run_session(SyncMode::Bulk).await
    }

    async fn run_session(&self, mode: SyncMode) -> EngineResult<SyncResult> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::ShuttingDown);
        }
        let _session = self.session.try_lock().map_err(|_| {
            debug!(%mode, "Sync requested while a session is running");
            SyncError::AlreadySyncing
        })?;
        let _active = ActiveSession::enter(self);
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::ShuttingDown);
        }

        self.run_locked(mode).await
    }

    async fn run_locked(&self, mode: SyncMode) -> EngineResult<SyncResult> {
        info!(%mode, "Sync session started");

        let online = self.connectivity.is_reachable() || self.connectivity.recheck().await;
        if !online {
            info!(%mode, "Authority unreachable, sync skipped");
            let result = SyncResult::offline(mode);
            self.finish(&result);
            return Ok(result);
        }

        let outcome = match mode {
            SyncMode::Incremental => self.run_incremental().await,
            SyncMode::Bulk => self.run_bulk().await,
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) => return Err(self.abort(mode, e)),
        };

        if let Err(e) = self.after_session(&result).await {
            return Err(self.abort(mode, e));
        }

        self.finish(&result);
        Ok(result)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    async fn run_incremental(&self) -> EngineResult<SyncResult> {
        let mode = SyncMode::Incremental;
        let records = self.db.records();

        let requeued = records.requeue_failed(self.options.max_attempts).await?;
        if requeued > 0 {
            debug!(count = requeued, "Re-queued failed records");
        }

        let pending = records.list_pending(None).await?;
        let total = u32::try_from(pending.len()).unwrap_or(u32::MAX);
        self.progress.begin(total);

        let mut synced = 0u32;
        let mut failed = 0u32;
        let mut errors = Vec::new();

        for record in &pending {
            if self.is_cancelled() {
                info!(synced, remaining = total - synced - failed, "Sync cancelled");
                if !errors.is_empty() {
                    warn!(?errors, "Record failures before cancellation");
                }
                return Ok(SyncResult::cancelled(mode, synced, failed));
            }

            self.progress.set_label(record.label());

            match self.remote.push_record(record).await {
                Ok(()) => {
                    if resolved(records.mark_synced(&record.id).await)? {
                        synced += 1;
                    }
                }
                Err(err) => {
                    warn!(
                        record_id = %record.id,
                        kind = %record.entity_kind,
                        attempt = record.attempt_count + 1,
                        error = %err,
                        "Record push failed"
                    );
                    resolved(records.mark_failed(&record.id, &err.to_string()).await)?;
                    failed += 1;
                    errors.push(format!("{} {}: {}", record.entity_kind, record.entity_id, err));

                    if !self.connectivity.recheck().await {
                        warn!("Authority lost mid-session, leaving remaining records pending");
                        errors.push(OFFLINE_ERROR.to_string());
                        self.progress.advance();
                        break;
                    }
                }
            }

            self.progress.advance();
        }

        Ok(SyncResult::new(mode, synced, failed, 0, errors))
    }

    async fn run_bulk(&self) -> EngineResult<SyncResult> {
        let mode = SyncMode::Bulk;
        self.progress.begin(BULK_STEPS);

        // 1. Pull
        self.progress.set_label("Downloading snapshot");
        let blob = match self.remote.pull_snapshot().await {
            Ok(blob) => blob,
            Err(e) => return Ok(self.bulk_transport_failure("snapshot download", e).await),
        };
        self.progress.advance();
        if self.is_cancelled() {
            return Ok(SyncResult::cancelled(mode, 0, 0));
        }

        // 2. Merge
        self.progress.set_label("Merging local changes");
        let remote = match Snapshot::decode(&blob) {
            Ok(snapshot) => snapshot,
            Err(e) => return Ok(bulk_failure(vec![MergeError::from(e).to_string()])),
        };
        let pending = self.db.records().list_pending(None).await?;
        let change_set = match merge(&pending, &remote) {
            Ok(change_set) => change_set,
            Err(e) => return Ok(bulk_failure(vec![e.to_string()])),
        };
        let counts = change_set.counts();
        debug!(
            applied_local = counts.applied_local,
            applied_remote = counts.applied_remote,
            conflicts = counts.conflicts,
            "Snapshot merged"
        );
        self.progress.advance();
        if self.is_cancelled() {
            return Ok(SyncResult::cancelled(mode, 0, 0));
        }

        // 3. Push
        self.progress.set_label("Uploading merged snapshot");
        let encoded = match change_set.merged.encode() {
            Ok(encoded) => encoded,
            Err(e) => return Ok(bulk_failure(vec![e.to_string()])),
        };
        if let Err(e) = self.remote.push_snapshot(encoded).await {
            return Ok(self.bulk_transport_failure("snapshot upload", e).await);
        }
        self.progress.advance();

        // 4. Commit. The authority already holds the merged state, so a
        // cancellation is not honoured past this point.
        self.progress.set_label("Committing");
        let synced_ids = change_set.synced_record_ids();
        let synced = self
            .db
            .commit_bulk(&change_set.merged, &synced_ids, Utc::now())
            .await?;
        self.progress.advance();

        let errors: Vec<String> = change_set
            .conflicts()
            .map(|entry| {
                format!(
                    "conflict: {} {} differed on the authority, local value kept",
                    entry.kind, entry.entity_id
                )
            })
            .collect();

        let synced = u32::try_from(synced).unwrap_or(u32::MAX);
        let conflicts = u32::try_from(change_set.conflict_count()).unwrap_or(u32::MAX);
        Ok(SyncResult::new(mode, synced, 0, conflicts, errors))
    }

    /// Persists the session's side effects on the store.
    async fn after_session(&self, result: &SyncResult) -> EngineResult<()> {
        // The bulk commit already stored last_sync_time in its transaction.
        if result.mode == SyncMode::Incremental && result.synced_count > 0 {
            self.db.meta().set_last_sync_time(result.completed_at).await?;
        }

        if result.success && self.options.prune_synced {
            let pruned = self.db.records().prune_synced().await?;
            if pruned > 0 {
                debug!(count = pruned, "Pruned synced records");
            }
        }

        Ok(())
    }

    /// A snapshot transfer failed; re-probes so a lost authority is noticed.
    async fn bulk_transport_failure(&self, step: &str, err: TransportError) -> SyncResult {
        let mut errors = vec![format!("{}: {}", step, err)];
        if !self.connectivity.recheck().await {
            warn!("Authority lost during bulk sync");
            errors.push(OFFLINE_ERROR.to_string());
        }
        bulk_failure(errors)
    }

    /// Ends a session that hit a fatal error. The error is kept as the
    /// last result so observers don't see a stale session.
    fn abort(&self, mode: SyncMode, e: SyncError) -> SyncError {
        error!(%mode, error = %e, "Sync session aborted");
        *self
            .last_result
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) =
            Some(SyncResult::new(mode, 0, 0, 0, vec![e.to_string()]));
        self.progress.finish(SyncPhase::Failed);
        self.progress.reset();
        e
    }

    fn finish(&self, result: &SyncResult) {
        info!(
            mode = %result.mode,
            success = result.success,
            synced = result.synced_count,
            failed = result.failed_count,
            conflicts = result.conflict_count,
            "Sync session finished"
        );

        *self
            .last_result
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(result.clone());

        self.progress.finish(result.phase());
        self.progress.reset();
    }
}

/// Marks a session as running; clears the flags even if the session
/// future is dropped mid-flight.
struct ActiveSession<'a> {
    coordinator: &'a SyncCoordinator,
}

impl<'a> ActiveSession<'a> {
    fn enter(coordinator: &'a SyncCoordinator) -> Self {
        coordinator.syncing.store(true, Ordering::SeqCst);
        ActiveSession { coordinator }
    }
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.coordinator.cancel_requested.store(false, Ordering::SeqCst);
        self.coordinator.syncing.store(false, Ordering::SeqCst);
    }
}

/// Maps a status transition outcome; a missing record was already resolved.
fn resolved(outcome: Result<(), DbError>) -> EngineResult<bool> {
    match outcome {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => {
            debug!(error = %e, "Record vanished during sync, skipping");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn bulk_failure(errors: Vec<String>) -> SyncResult {
    warn!(?errors, "Bulk sync failed, records stay pending");
    SyncResult::new(SyncMode::Bulk, 0, 0, 0, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ReachabilityProbe;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use fieldstock_core::{InventoryItemPayload, RecordStatus, SnapshotEntity};
    use fieldstock_db::DbConfig;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeRemote {
        pushed: StdMutex<Vec<String>>,
        failing: StdMutex<HashSet<String>>,
        gate: Option<Arc<Notify>>,
        pull_gate: Option<Arc<Notify>>,
        snapshot: StdMutex<Vec<u8>>,
        pull_error: StdMutex<Option<TransportError>>,
        upload_error: StdMutex<Option<TransportError>>,
        uploaded: StdMutex<Option<Vec<u8>>>,
    }

    impl FakeRemote {
        fn pushed(&self) -> Vec<String> {
            self.pushed.lock().unwrap().clone()
        }

        fn fail(&self, entity_id: &str) {
            self.failing.lock().unwrap().insert(entity_id.to_string());
        }

        fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl RemoteSyncClient for FakeRemote {
        async fn push_record(&self, record: &Record) -> Result<(), TransportError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.failing.lock().unwrap().contains(&record.entity_id) {
                return Err(TransportError::Http {
                    status: 500,
                    message: "database is locked".into(),
                });
            }
            self.pushed.lock().unwrap().push(record.entity_id.clone());
            Ok(())
        }

        async fn pull_snapshot(&self) -> Result<Vec<u8>, TransportError> {
            if let Some(gate) = &self.pull_gate {
                gate.notified().await;
            }
            if let Some(err) = self.pull_error.lock().unwrap().clone() {
                return Err(err);
            }
            Ok(self.snapshot.lock().unwrap().clone())
        }

        async fn push_snapshot(&self, blob: Vec<u8>) -> Result<(), TransportError> {
            if let Some(err) = self.upload_error.lock().unwrap().clone() {
                return Err(err);
            }
            *self.uploaded.lock().unwrap() = Some(blob);
            Ok(())
        }
    }

    /// Reachability probe with a switchable answer.
    struct SwitchProbe {
        up: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReachabilityProbe for SwitchProbe {
        async fn probe(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.up.load(Ordering::SeqCst)
        }
    }

    /// Waits until the session is past the first record boundary.
    async fn wait_for_push(coordinator: &SyncCoordinator) {
        while coordinator.progress().current_label.is_none() {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_until_failed(coordinator: &SyncCoordinator, count: i64) {
        for _ in 0..500 {
            let failed = coordinator
                .database()
                .records()
                .count_by_status(RecordStatus::Failed)
                .await
                .unwrap();
            if failed == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("records never failed");
    }

    fn item(id: &str, quantity: i64) -> EntityPayload {
        EntityPayload::InventoryItem(InventoryItemPayload {
            item_id: id.into(),
            sku: format!("SKU-{}", id),
            name: format!("Item {}", id),
            quantity,
            unit: Some("pcs".into()),
            location: Some("AISLE-1".into()),
            barcode: None,
        })
    }

    async fn setup(remote: Arc<FakeRemote>) -> (Arc<SyncCoordinator>, Arc<ConnectivityMonitor>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let connectivity = Arc::new(ConnectivityMonitor::interface_only());
        let coordinator = Arc::new(SyncCoordinator::new(
            db,
            remote,
            connectivity.clone(),
            ProgressReporter::new(),
            CoordinatorOptions::default(),
        ));
        (coordinator, connectivity)
    }

    #[tokio::test]
    async fn test_offline_sync_leaves_records_pending() {
        let remote = Arc::new(FakeRemote::default());
        let (coordinator, connectivity) = setup(remote.clone()).await;
        connectivity.set_interface_state(false);

        for i in 0..3 {
            coordinator
                .enqueue_payload(item(&format!("itm-{}", i), 5))
                .await
                .unwrap();
        }

        let result = coordinator.sync().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.errors, vec![OFFLINE_ERROR.to_string()]);
        assert!(remote.pushed().is_empty());

        let stats = coordinator.stats().await.unwrap();
        assert_eq!(stats.pending_count, 3);
        assert!(!stats.is_online);
        assert_eq!(coordinator.progress().phase, SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_payload() {
        let (coordinator, _) = setup(Arc::new(FakeRemote::default())).await;

        let err = coordinator.enqueue_payload(item("itm-1", -4)).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let err = coordinator
            .enqueue(EntityKind::Transfer, serde_json::json!({ "transfer_id": "t" }))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Payload(_)));

        assert_eq!(coordinator.stats().await.unwrap().pending_count, 0);
    }

    #[tokio::test]
    async fn test_failed_record_is_isolated_and_retried() {
        let remote = Arc::new(FakeRemote::default());
        let (coordinator, _) = setup(remote.clone()).await;

        for id in ["itm-a", "itm-b", "itm-c"] {
            coordinator.enqueue_payload(item(id, 1)).await.unwrap();
        }
        remote.fail("itm-b");

        let first = coordinator.sync().await.unwrap();
        assert!(!first.success);
        assert_eq!(first.synced_count, 2);
        assert_eq!(first.failed_count, 1);
        assert_eq!(
            first.errors,
            vec!["inventory_item itm-b: HTTP 500: database is locked".to_string()]
        );
        assert_eq!(coordinator.stats().await.unwrap().failed_count, 1);

        remote.heal();
        let second = coordinator.sync().await.unwrap();
        assert!(second.success);
        assert_eq!(second.synced_count, 1);
        assert_eq!(remote.pushed(), vec!["itm-a", "itm-c", "itm-b"]);

        let stats = coordinator.stats().await.unwrap();
        assert_eq!(stats.pending_count, 0);
        assert_eq!(stats.failed_count, 0);
        assert!(stats.last_sync_time.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_records_need_operator_retry() {
        let remote = Arc::new(FakeRemote::default());
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let coordinator = SyncCoordinator::new(
            db,
            remote.clone(),
            Arc::new(ConnectivityMonitor::interface_only()),
            ProgressReporter::new(),
            CoordinatorOptions {
                max_attempts: 1,
                prune_synced: true,
            },
        );

        coordinator.enqueue_payload(item("itm-x", 1)).await.unwrap();
        remote.fail("itm-x");
        coordinator.sync().await.unwrap();

        remote.heal();
        let skipped = coordinator.sync().await.unwrap();
        assert_eq!(skipped.synced_count, 0);
        assert_eq!(coordinator.stats().await.unwrap().failed_count, 1);

        assert_eq!(coordinator.retry_failed().await.unwrap(), 1);
        let retried = coordinator.sync().await.unwrap();
        assert_eq!(retried.synced_count, 1);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_bounded() {
        let remote = Arc::new(FakeRemote::default());
        let (coordinator, _) = setup(remote.clone()).await;
        for i in 0..5 {
            coordinator
                .enqueue_payload(item(&format!("itm-{}", i), 2))
                .await
                .unwrap();
        }
        remote.fail("itm-2");

        let seen = Arc::new(StdMutex::new(Vec::<ProgressSnapshot>::new()));
        let sink = seen.clone();
        coordinator.subscribe_progress(move |s: &ProgressSnapshot| {
            sink.lock().unwrap().push(s.clone());
        });

        coordinator.sync().await.unwrap();

        let seen = seen.lock().unwrap();
        let during: Vec<&ProgressSnapshot> = seen
            .iter()
            .filter(|s| s.phase != SyncPhase::Idle)
            .collect();
        assert!(!during.is_empty());
        for pair in during.windows(2) {
            assert!(pair[1].completed >= pair[0].completed);
        }
        for s in &during {
            assert!(s.completed <= s.total);
            assert_eq!(s.total, 5);
        }
        assert_eq!(during.last().unwrap().phase, SyncPhase::Failed);
        assert_eq!(during.last().unwrap().completed, 5);
        assert_eq!(seen.last().unwrap().phase, SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_concurrent_sync_is_rejected() {
        let gate = Arc::new(Notify::new());
        let remote = Arc::new(FakeRemote {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let (coordinator, _) = setup(remote.clone()).await;
        coordinator.enqueue_payload(item("itm-1", 1)).await.unwrap();

        let running = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.sync().await })
        };
        while !coordinator.is_syncing() {
            tokio::task::yield_now().await;
        }

        let second = coordinator.sync().await;
        assert!(matches!(second, Err(SyncError::AlreadySyncing)));
        assert!(coordinator.stats().await.unwrap().is_syncing);

        gate.notify_one();
        let first = running.await.unwrap().unwrap();
        assert!(first.success);
        assert_eq!(remote.pushed().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_at_record_boundary() {
        let gate = Arc::new(Notify::new());
        let remote = Arc::new(FakeRemote {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let (coordinator, _) = setup(remote.clone()).await;
        for i in 0..3 {
            coordinator
                .enqueue_payload(item(&format!("itm-{}", i), 1))
                .await
                .unwrap();
        }

        let running = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.sync().await })
        };
        wait_for_push(&coordinator).await;

        coordinator.cancel();
        gate.notify_one();

        let result = running.await.unwrap().unwrap();
        assert!(result.was_cancelled());
        assert_eq!(result.errors, vec!["cancelled".to_string()]);
        assert_eq!(result.synced_count, 1);
        assert_eq!(coordinator.stats().await.unwrap().pending_count, 2);
        assert_eq!(coordinator.last_result(), Some(result));
    }

    #[tokio::test]
    async fn test_bulk_sync_merges_and_commits() {
        let remote = Arc::new(FakeRemote::default());
        let (coordinator, _) = setup(remote.clone()).await;

        let authority = Snapshot::new(vec![
            SnapshotEntity::from_payload(&item("itm-conflict", 10)),
            SnapshotEntity::from_payload(&item("itm-remote", 7)),
            SnapshotEntity::from_payload(&item("itm-same", 3)),
        ]);
        *remote.snapshot.lock().unwrap() = authority.encode().unwrap();

        coordinator.enqueue_payload(item("itm-conflict", 12)).await.unwrap();
        coordinator.enqueue_payload(item("itm-same", 3)).await.unwrap();
        coordinator.enqueue_payload(item("itm-local", 1)).await.unwrap();

        let result = coordinator.sync_bulk().await.unwrap();
        assert_eq!(result.mode, SyncMode::Bulk);
        assert_eq!(result.synced_count, 2);
        assert_eq!(result.conflict_count, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("conflict: inventory_item itm-conflict"));

        let uploaded = remote.uploaded.lock().unwrap().clone().unwrap();
        let merged = Snapshot::decode(&uploaded).unwrap();
        assert_eq!(merged.len(), 4);
        let kept = merged
            .get(EntityKind::InventoryItem, "itm-conflict")
            .unwrap()
            .typed_payload()
            .unwrap();
        assert_eq!(kept, item("itm-conflict", 12));

        let db = coordinator.database();
        assert_eq!(db.replica().count().await.unwrap(), 4);
        let pending = db.records().list_pending(None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity_id, "itm-conflict");
        assert_eq!(pending[0].status, RecordStatus::Pending);
        assert!(db.meta().last_sync_time().await.unwrap().is_some());

        // The authority now agrees with the local value.
        *remote.snapshot.lock().unwrap() = uploaded;
        let again = coordinator.sync_bulk().await.unwrap();
        assert!(again.success);
        assert_eq!(again.synced_count, 1);
        assert_eq!(coordinator.stats().await.unwrap().pending_count, 0);
    }

    #[tokio::test]
    async fn test_bulk_sync_bad_snapshot_keeps_everything_pending() {
        let remote = Arc::new(FakeRemote::default());
        let (coordinator, _) = setup(remote.clone()).await;
        *remote.snapshot.lock().unwrap() = b"not a snapshot".to_vec();
        coordinator.enqueue_payload(item("itm-1", 1)).await.unwrap();

        let result = coordinator.sync_bulk().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.synced_count, 0);
        assert!(remote.uploaded.lock().unwrap().is_none());
        assert_eq!(coordinator.stats().await.unwrap().pending_count, 1);
        assert!(coordinator.database().meta().last_sync_time().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bulk_pull_failure_rechecks_reachability() {
        let remote = Arc::new(FakeRemote::default());
        *remote.pull_error.lock().unwrap() =
            Some(TransportError::Unreachable("connection refused".into()));
        let probe = Arc::new(SwitchProbe {
            up: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        });
        let connectivity = Arc::new(ConnectivityMonitor::new(
            Some(probe.clone() as Arc<dyn ReachabilityProbe>),
            Duration::from_secs(1),
        ));
        connectivity.set_authority_reachable(true);

        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let coordinator = SyncCoordinator::new(
            db,
            remote.clone(),
            connectivity.clone(),
            ProgressReporter::new(),
            CoordinatorOptions::default(),
        );
        coordinator.enqueue_payload(item("itm-1", 1)).await.unwrap();

        let result = coordinator.sync_bulk().await.unwrap();
        assert!(!result.success);
        assert_eq!(
            result.errors,
            vec![
                "snapshot download: Authority unreachable: connection refused".to_string(),
                OFFLINE_ERROR.to_string(),
            ]
        );
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert!(!connectivity.is_reachable());

        let stats = coordinator.stats().await.unwrap();
        assert!(!stats.is_online);
        assert_eq!(stats.pending_count, 1);
        assert!(remote.uploaded.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bulk_upload_failure_keeps_everything_pending() {
        let remote = Arc::new(FakeRemote::default());
        *remote.snapshot.lock().unwrap() = Snapshot::new(vec![SnapshotEntity::from_payload(
            &item("itm-remote", 4),
        )])
        .encode()
        .unwrap();
        *remote.upload_error.lock().unwrap() = Some(TransportError::Http {
            status: 503,
            message: "maintenance".into(),
        });
        let (coordinator, connectivity) = setup(remote.clone()).await;
        coordinator.enqueue_payload(item("itm-1", 1)).await.unwrap();
        coordinator.enqueue_payload(item("itm-2", 2)).await.unwrap();

        let result = coordinator.sync_bulk().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.synced_count, 0);
        assert_eq!(
            result.errors,
            vec!["snapshot upload: HTTP 503: maintenance".to_string()]
        );
        assert!(connectivity.is_reachable());

        let db = coordinator.database();
        assert_eq!(db.records().list_pending(None).await.unwrap().len(), 2);
        assert_eq!(db.replica().count().await.unwrap(), 0);
        assert!(db.meta().last_sync_time().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bulk_cancel_after_download_commits_nothing() {
        let pull_gate = Arc::new(Notify::new());
        let remote = Arc::new(FakeRemote {
            pull_gate: Some(pull_gate.clone()),
            ..Default::default()
        });
        *remote.snapshot.lock().unwrap() = Snapshot::empty().encode().unwrap();
        let (coordinator, _) = setup(remote.clone()).await;
        coordinator.enqueue_payload(item("itm-1", 1)).await.unwrap();

        let running = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.sync_bulk().await })
        };
        while !coordinator.is_syncing() {
            tokio::task::yield_now().await;
        }

        coordinator.cancel();
        pull_gate.notify_one();

        let result = running.await.unwrap().unwrap();
        assert!(result.was_cancelled());
        assert_eq!(result.mode, SyncMode::Bulk);
        assert_eq!(result.synced_count, 0);
        assert!(remote.uploaded.lock().unwrap().is_none());

        let db = coordinator.database();
        assert_eq!(db.records().list_pending(None).await.unwrap().len(), 1);
        assert_eq!(db.replica().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_after_failure_keeps_failure_on_record() {
        let gate = Arc::new(Notify::new());
        let remote = Arc::new(FakeRemote {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let (coordinator, _) = setup(remote.clone()).await;
        let broken = coordinator.enqueue_payload(item("itm-0", 1)).await.unwrap();
        coordinator.enqueue_payload(item("itm-1", 1)).await.unwrap();
        coordinator.enqueue_payload(item("itm-2", 1)).await.unwrap();
        remote.fail("itm-0");

        let running = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.sync().await })
        };
        gate.notify_one();
        wait_until_failed(&coordinator, 1).await;

        coordinator.cancel();
        gate.notify_one();

        let result = running.await.unwrap().unwrap();
        assert_eq!(result.errors, vec!["cancelled".to_string()]);
        assert_eq!(result.failed_count, 1);

        let stored = coordinator.database().records().get(&broken.id).await.unwrap();
        assert_eq!(stored.status, RecordStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("HTTP 500: database is locked"));
    }

    #[tokio::test]
    async fn test_storage_failure_is_kept_as_last_result() {
        let remote = Arc::new(FakeRemote::default());
        let (coordinator, _) = setup(remote).await;
        coordinator.enqueue_payload(item("itm-1", 1)).await.unwrap();
        coordinator.sync().await.unwrap();
        assert!(coordinator.last_result().unwrap().success);

        coordinator.database().close().await;
        let err = coordinator.sync().await.unwrap_err();
        assert!(matches!(err, SyncError::Storage(_)));

        let last = coordinator.last_result().unwrap();
        assert!(!last.success);
        assert_eq!(last.errors, vec![err.to_string()]);
        assert_eq!(coordinator.progress().phase, SyncPhase::Idle);
        assert!(!coordinator.is_syncing());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_record() {
        let gate = Arc::new(Notify::new());
        let remote = Arc::new(FakeRemote {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let (coordinator, _) = setup(remote.clone()).await;
        coordinator.enqueue_payload(item("itm-0", 1)).await.unwrap();
        coordinator.enqueue_payload(item("itm-1", 1)).await.unwrap();

        let running = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.sync().await })
        };
        wait_for_push(&coordinator).await;

        let stopping = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.shutdown().await })
        };
        while !matches!(coordinator.sync().await, Err(SyncError::ShuttingDown)) {
            tokio::task::yield_now().await;
        }
        assert!(!stopping.is_finished());

        gate.notify_one();
        stopping.await.unwrap();

        let result = running.await.unwrap().unwrap();
        assert!(result.was_cancelled());
        assert_eq!(result.synced_count, 1);
        assert_eq!(remote.pushed(), vec!["itm-0"]);

        let records = coordinator.database().records();
        assert_eq!(records.count_by_status(RecordStatus::Synced).await.unwrap(), 1);
        assert_eq!(records.count_by_status(RecordStatus::Pending).await.unwrap(), 1);
        coordinator.database().close().await;
    }
}
