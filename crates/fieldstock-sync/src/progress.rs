//! # Progress Reporter
//!
//! Publishes the state of the running sync session to observers.
//!
//! ```text
//!   SyncCoordinator ──begin/advance/finish──► ProgressReporter
//!                                                │
//!                          ┌─────────────────────┼──────────────────┐
//!                          ▼                     ▼                  ▼
//!                   watch::Receiver        ProgressListener     current()
//!                   (async UI bridge)      (callbacks)          (polling)
//! ```
//!
//! Observers only read. The writers are crate-private so the coordinator
//! is the single source of truth for a session's progress.

use std::fmt;
use std::sync::{Arc, RwLock};

use tokio::sync::watch;

use fieldstock_core::{ProgressSnapshot, SyncPhase};

/// Callback invoked with every published snapshot.
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, snapshot: &ProgressSnapshot);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressSnapshot) + Send + Sync,
{
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self(snapshot)
    }
}

struct Inner {
    tx: watch::Sender<ProgressSnapshot>,
    listeners: RwLock<Vec<Arc<dyn ProgressListener>>>,
}

/// Shared handle to the session progress. Cheap to clone.
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<Inner>,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("current", &*self.inner.tx.borrow())
            .finish()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::idle());
        ProgressReporter {
            inner: Arc::new(Inner {
                tx,
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Latest published snapshot.
    pub fn current(&self) -> ProgressSnapshot {
        self.inner.tx.borrow().clone()
    }

    /// Receiver that wakes on every publish.
    pub fn watch(&self) -> watch::Receiver<ProgressSnapshot> {
        self.inner.tx.subscribe()
    }

    /// Registers a callback for every subsequent publish.
    pub fn subscribe(&self, listener: impl ProgressListener + 'static) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(listener));
    }

    // =========================================================================
    // Writers (coordinator only)
    // =========================================================================

    /// Starts a session over `total` items.
    pub(crate) fn begin(&self, total: u32) {
        self.publish(|s| {
            *s = ProgressSnapshot {
                total,
                completed: 0,
                current_label: None,
                phase: SyncPhase::Syncing,
            };
        });
    }

    /// Names the in-flight item.
    pub(crate) fn set_label(&self, label: impl Into<String>) {
        let label = label.into();
        self.publish(|s| s.current_label = Some(label));
    }

    /// Counts one item as done. Clamped to `total`.
    pub(crate) fn advance(&self) {
        self.publish(|s| {
            if s.completed < s.total {
                s.completed += 1;
            }
        });
    }

    /// Ends the session with a terminal phase.
    pub(crate) fn finish(&self, phase: SyncPhase) {
        self.publish(|s| {
            s.phase = phase;
            s.current_label = None;
        });
    }

    /// Returns to idle after the terminal phase was observed.
    pub(crate) fn reset(&self) {
        self.publish(|s| *s = ProgressSnapshot::idle());
    }

    fn publish(&self, update: impl FnOnce(&mut ProgressSnapshot)) {
        let mut published = None;
        self.inner.tx.send_modify(|s| {
            update(s);
            published = Some(s.clone());
        });

        let Some(snapshot) = published else {
            return;
        };

        let listeners: Vec<Arc<dyn ProgressListener>> = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in listeners {
            listener.on_progress(&snapshot);
        }
    }
}
