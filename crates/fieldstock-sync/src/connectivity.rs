//! # Connectivity Monitor
//!
//! Tracks whether the remote authority can be reached right now.
//!
//! ## State Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   interface up? ──┐                                                     │
//! │  (platform hook)  ├──► AND ──► is_reachable() ──► watch / callbacks     │
//! │   authority up? ──┘                (notified on change only)            │
//! │  (last probe)                                                           │
//! │                                                                         │
//! │   Probe loop:  reachable ──► sleep(probe_interval) ──► probe again      │
//! │                unreachable ──► sleep(backoff: 0.5s, 1s, 2s .. 60s)      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A link-layer connection does not imply the authority is up, so the
//! monitor combines the interface flag with an application-level probe.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{EngineResult, SyncError};

/// Default bound on a single reachability probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Application-level check that the authority answers.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Returns true if the authority responded.
    async fn probe(&self) -> bool;
}

type ConnectivityCallback = Arc<dyn Fn(bool) + Send + Sync>;

// =============================================================================
// Connectivity Monitor
// =============================================================================

/// Combines interface state and authority reachability.
pub struct ConnectivityMonitor {
    interface_up: AtomicBool,
    authority_up: AtomicBool,
    state_tx: watch::Sender<bool>,
    callbacks: RwLock<Vec<ConnectivityCallback>>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    probe_timeout: Duration,
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("interface_up", &self.interface_up.load(Ordering::SeqCst))
            .field("authority_up", &self.authority_up.load(Ordering::SeqCst))
            .field("has_probe", &self.probe.is_some())
            .finish()
    }
}

impl ConnectivityMonitor {
    /// Creates a monitor. With a probe, the authority counts as down until
    /// the first successful probe.
    pub fn new(probe: Option<Arc<dyn ReachabilityProbe>>, probe_timeout: Duration) -> Self {
        let authority_up = probe.is_none();
        let (state_tx, _rx) = watch::channel(authority_up);
        ConnectivityMonitor {
            interface_up: AtomicBool::new(true),
            authority_up: AtomicBool::new(authority_up),
            state_tx,
            callbacks: RwLock::new(Vec::new()),
            probe,
            probe_timeout,
        }
    }

    /// Monitor backed by a probe with the default timeout.
    pub fn with_probe(probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self::new(Some(probe), DEFAULT_PROBE_TIMEOUT)
    }

    /// Monitor without a probe: reachable whenever the interface is up.
    pub fn interface_only() -> Self {
        Self::new(None, DEFAULT_PROBE_TIMEOUT)
    }

    /// Interface up AND authority reachable at the last probe.
    pub fn is_reachable(&self) -> bool {
        self.interface_up.load(Ordering::SeqCst) && self.authority_up.load(Ordering::SeqCst)
    }

    pub fn is_interface_up(&self) -> bool {
        self.interface_up.load(Ordering::SeqCst)
    }

    /// Receiver for reachability transitions.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state_tx.subscribe()
    }

    /// Registers a callback for reachability transitions.
    pub fn subscribe(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        self.callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(callback));
    }

    /// Platform hook for network interface changes.
    pub fn set_interface_state(&self, up: bool) {
        debug!(up, "Network interface state changed");
        self.interface_up.store(up, Ordering::SeqCst);
        self.publish();
    }

    /// Records an externally observed authority state.
    pub fn set_authority_reachable(&self, up: bool) {
        self.authority_up.store(up, Ordering::SeqCst);
        self.publish();
    }

    /// Probes the authority now and returns the combined state.
    ///
    /// Skips the probe while the interface is down. A probe that outlives
    /// the probe timeout counts as unreachable.
    pub async fn recheck(&self) -> bool {
        if !self.is_interface_up() {
            return false;
        }

        let Some(probe) = self.probe.as_ref() else {
            return self.is_reachable();
        };

        let up = match tokio::time::timeout(self.probe_timeout, probe.probe()).await {
            Ok(up) => up,
            Err(_) => {
                debug!(timeout = ?self.probe_timeout, "Reachability probe timed out");
                false
            }
        };

        self.set_authority_reachable(up);
        self.is_reachable()
    }

    /// Spawns the background probe loop.
    pub fn spawn_probe_loop(self: &Arc<Self>, settings: ProbeLoopSettings) -> ProbeLoopHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        let probe_loop = ProbeLoop {
            monitor: Arc::clone(self),
            settings,
            shutdown_rx,
        };
        tokio::spawn(probe_loop.run());

        ProbeLoopHandle { shutdown_tx }
    }

    fn publish(&self) {
        let now = self.is_reachable();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == now {
                false
            } else {
                *current = now;
                true
            }
        });

        if !changed {
            return;
        }

        if now {
            info!("Authority reachable");
        } else {
            warn!("Authority unreachable, working offline");
        }

        let callbacks: Vec<ConnectivityCallback> = self
            .callbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for callback in callbacks {
            callback(now);
        }
    }
}

// =============================================================================
// Probe Loop
// =============================================================================

/// Timing of the background probe loop.
#[derive(Debug, Clone)]
pub struct ProbeLoopSettings {
    /// Delay between probes while the authority is up.
    pub interval: Duration,

    /// First delay after a failed probe.
    pub initial_backoff: Duration,

    /// Cap on the delay between failed probes.
    pub max_backoff: Duration,
}

impl Default for ProbeLoopSettings {
    fn default() -> Self {
        ProbeLoopSettings {
            interval: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Handle for stopping the probe loop.
#[derive(Clone)]
pub struct ProbeLoopHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ProbeLoopHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::Internal("Probe loop already stopped".into()))
    }
}

struct ProbeLoop {
    monitor: Arc<ConnectivityMonitor>,
    settings: ProbeLoopSettings,
    shutdown_rx: mpsc::Receiver<()>,
}

impl ProbeLoop {
    async fn run(mut self) {
        info!(interval = ?self.settings.interval, "Connectivity probe loop starting");

        let mut backoff = self.create_backoff();

        loop {
            let wait = if self.monitor.recheck().await {
                backoff.reset();
                self.settings.interval
            } else {
                backoff.next_backoff().unwrap_or(self.settings.max_backoff)
            };

            debug!(?wait, "Next reachability probe scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.shutdown_rx.recv() => {
                    info!("Connectivity probe loop received shutdown signal");
                    break;
                }
            }
        }

        info!("Connectivity probe loop stopped");
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.settings.initial_backoff,
            max_interval: self.settings.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}
