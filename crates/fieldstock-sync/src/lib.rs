//! # fieldstock-sync: Offline-First Sync Engine for Fieldstock
//!
//! Field devices record stock counts, movements and transfers into a local
//! store while disconnected. This crate moves those records to the remote
//! authority once it is reachable again, and reconciles whole-state
//! snapshots on demand.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  UI / scanner ──enqueue──► SyncCoordinator ◄──sync()── AutoSyncScheduler│
//! │                                 │    │                  (interval,      │
//! │                                 │    │                   regained)      │
//! │         ┌───────────────────────┘    └──────────────┐                   │
//! │         ▼                                           ▼                   │
//! │  ┌────────────────┐  ┌────────────────────┐  ┌──────────────────────┐  │
//! │  │ fieldstock-db  │  │ ConnectivityMonitor│  │ RemoteSyncClient     │  │
//! │  │                │  │                    │  │                      │  │
//! │  │ pending records│  │ interface + probe  │  │ REST push per record │  │
//! │  │ replica, meta  │  │ backoff loop       │  │ snapshot up/download │  │
//! │  └────────────────┘  └────────────────────┘  └──────────────────────┘  │
//! │                                                                         │
//! │  ProgressReporter ──watch──► UI progress bar / logs                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Engine configuration (TOML + env)
//! - [`connectivity`] - Reachability tracking and probe loop
//! - [`coordinator`] - Sync sessions (incremental and bulk)
//! - [`error`] - Transport and engine error types
//! - [`progress`] - Session progress publishing
//! - [`remote`] - HTTP client for the authority
//! - [`scheduler`] - Automatic session triggering
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fieldstock_sync::*;
//!
//! let config = EngineConfig::load_or_default(None);
//! let remote = Arc::new(HttpRemoteClient::new(config.remote_config()?, config.token_source())?);
//! let connectivity = Arc::new(ConnectivityMonitor::with_probe(remote.clone()));
//!
//! let coordinator = Arc::new(SyncCoordinator::new(
//!     db,
//!     remote,
//!     connectivity.clone(),
//!     ProgressReporter::new(),
//!     config.coordinator_options(),
//! ));
//!
//! let scheduler = AutoSyncScheduler::spawn(coordinator.clone(), connectivity, config.sync_interval());
//! let result = coordinator.sync().await?;
//! println!("synced {} records", result.synced_count);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod progress;
pub mod remote;
pub mod scheduler;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::EngineConfig;
pub use connectivity::{
    ConnectivityMonitor, ProbeLoopHandle, ProbeLoopSettings, ReachabilityProbe,
    DEFAULT_PROBE_TIMEOUT,
};
pub use coordinator::{CoordinatorOptions, EngineStats, SyncCoordinator};
pub use error::{EngineResult, SyncError, TransportError};
pub use progress::{ProgressListener, ProgressReporter};
pub use remote::{
    EnvToken, HttpRemoteClient, RemoteConfig, RemoteSyncClient, StaticToken, TokenSource,
};
pub use scheduler::{AutoSyncScheduler, SchedulerHandle, DEFAULT_SYNC_INTERVAL};

pub use fieldstock_core::{ProgressSnapshot, SyncMode, SyncPhase, SyncResult};
