//! # Auto-Sync Scheduler
//!
//! Starts incremental sessions without user action.
//!
//! ## Triggers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   interval tick (default 5 min) ──┐                                     │
//! │   connectivity false → true ──────┼──► offline? ──yes──► skip           │
//! │   trigger_now() ──────────────────┘      │                              │
//! │                                          no                             │
//! │                                          ▼                              │
//! │                                    session running? ──yes──► skip       │
//! │                                          │                              │
//! │                                          no                             │
//! │                                          ▼                              │
//! │                                spawn coordinator.sync()                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sessions run on their own task, so the timer keeps ticking while one is
//! in flight. Ticks that land during a session are skipped, never queued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::connectivity::ConnectivityMonitor;
use crate::coordinator::SyncCoordinator;
use crate::error::{EngineResult, SyncError};

/// Default interval between automatic sessions.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
struct SchedulerStats {
    fired: AtomicU64,
    skipped: AtomicU64,
}

// =============================================================================
// Scheduler Handle
// =============================================================================

/// Handle for interacting with a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    stats: Arc<SchedulerStats>,
}

impl SchedulerHandle {
    /// Requests a session now, subject to the usual skip rules.
    pub async fn trigger_now(&self) -> EngineResult<()> {
        self.trigger_tx
            .send(())
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// Triggers graceful shutdown. A session already running finishes on
    /// its own task.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// Triggers that started a session.
    pub fn ticks_fired(&self) -> u64 {
        self.stats.fired.load(Ordering::SeqCst)
    }

    /// Triggers skipped because the device was offline or a session was
    /// already running.
    pub fn ticks_skipped(&self) -> u64 {
        self.stats.skipped.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Auto-Sync Scheduler
// =============================================================================

/// Background loop driving automatic sessions.
pub struct AutoSyncScheduler {
    coordinator: Arc<SyncCoordinator>,
    connectivity: Arc<ConnectivityMonitor>,
    interval: Duration,
    online_rx: watch::Receiver<bool>,
    /// Reachability when `spawn` returned; transitions are measured from here.
    was_online: bool,
    trigger_rx: mpsc::Receiver<()>,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<SchedulerStats>,
}

impl AutoSyncScheduler {
    /// Spawns the scheduler. The first interval tick fires one `interval`
    /// after spawning.
    pub fn spawn(
        coordinator: Arc<SyncCoordinator>,
        connectivity: Arc<ConnectivityMonitor>,
        interval: Duration,
    ) -> SchedulerHandle {
        let (trigger_tx, trigger_rx) = mpsc::channel::<()>(8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let stats = Arc::new(SchedulerStats::default());
        let mut online_rx = connectivity.watch();
        let was_online = *online_rx.borrow_and_update();

        let scheduler = AutoSyncScheduler {
            coordinator,
            connectivity,
            interval,
            online_rx,
            was_online,
            trigger_rx,
            shutdown_rx,
            stats: stats.clone(),
        };
        tokio::spawn(scheduler.run());

        SchedulerHandle {
            trigger_tx,
            shutdown_tx,
            stats,
        }
    }

    async fn run(mut self) {
        info!(interval = ?self.interval, "Auto-sync scheduler starting");

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.fire("interval");
                }

                changed = self.online_rx.changed() => {
                    if changed.is_err() {
                        debug!("Connectivity channel closed");
                        break;
                    }
                    let online = *self.online_rx.borrow_and_update();
                    if online && !self.was_online {
                        self.fire("connectivity regained");
                    }
                    self.was_online = online;
                }

                Some(()) = self.trigger_rx.recv() => {
                    self.fire("manual");
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Auto-sync scheduler received shutdown signal");
                    break;
                }
            }
        }

        info!("Auto-sync scheduler stopped");
    }

    fn fire(&self, reason: &'static str) {
        if !self.connectivity.is_reachable() {
            debug!(reason, "Auto-sync skipped: offline");
            self.stats.skipped.fetch_add(1, Ordering::SeqCst);
            return;
        }

        if self.coordinator.is_syncing() {
            debug!(reason, "Auto-sync skipped: session in progress");
            self.stats.skipped.fetch_add(1, Ordering::SeqCst);
            return;
        }

        self.stats.fired.fetch_add(1, Ordering::SeqCst);
        debug!(reason, "Auto-sync starting session");

        let coordinator = self.coordinator.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            match coordinator.sync().await {
                Ok(result) => {
                    debug!(
                        reason,
                        success = result.success,
                        synced = result.synced_count,
                        "Auto-sync session done"
                    );
                }
                Err(SyncError::ShuttingDown) => {
                    debug!(reason, "Auto-sync skipped: engine shutting down");
                    stats.fired.fetch_sub(1, Ordering::SeqCst);
                    stats.skipped.fetch_add(1, Ordering::SeqCst);
                }
                Err(SyncError::AlreadySyncing) => {
                    debug!(reason, "Auto-sync skipped: lost race for session lock");
                    stats.fired.fetch_sub(1, Ordering::SeqCst);
                    stats.skipped.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    error!(reason, error = %e, "Auto-sync session failed");
                }
            }
        });
    }
}
