//! # Fieldstock Agent
//!
//! Headless sync agent for field devices.
//!
//! ## Usage
//! ```bash
//! # Run with the default config (~/.config/fieldstock/engine.toml)
//! fieldstock
//!
//! # Explicit config, one bulk reconciliation, then exit
//! fieldstock --config ./engine.toml --bulk
//! ```
//!
//! Runs until Ctrl+C or SIGTERM. A session in flight at shutdown stops
//! after its current record; unpushed records stay pending for the next start.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use fieldstock_core::ProgressSnapshot;
use fieldstock_db::{Database, DbConfig};
use fieldstock_sync::{
    AutoSyncScheduler, ConnectivityMonitor, EngineConfig, HttpRemoteClient, ProbeLoopSettings,
    ProgressReporter, ReachabilityProbe, SyncCoordinator,
};

struct Args {
    config: Option<PathBuf>,
    bulk: bool,
}

fn parse_args() -> Option<Args> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args {
        config: None,
        bulk: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--bulk" => parsed.bulk = true,
            "--help" | "-h" => {
                println!("Fieldstock Agent");
                println!();
                println!("Usage: fieldstock [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Config file (default: platform config dir)");
                println!("      --bulk           Run one bulk snapshot sync and exit");
                println!("  -h, --help           Show this help message");
                return None;
            }
            other => warn!(arg = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    Some(parsed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fieldstock=debug,fieldstock_sync=debug,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();

    let Some(args) = parse_args() else {
        return Ok(());
    };

    info!("Starting Fieldstock agent...");

    // Load configuration
    let config = EngineConfig::load(args.config)?;
    let db_path = config.database_path()?;
    info!(
        device_id = %config.device_id(),
        database = %db_path.display(),
        "Configuration loaded"
    );

    // Open local store (runs migrations)
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::new(
        DbConfig::new(&db_path).max_connections(config.storage.max_connections),
    )
    .await?;

    // Remote authority + connectivity
    let remote = Arc::new(HttpRemoteClient::new(
        config.remote_config()?,
        config.token_source(),
    )?);
    let probe: Arc<dyn ReachabilityProbe> = remote.clone();
    let connectivity = Arc::new(ConnectivityMonitor::new(Some(probe), config.probe_timeout()));
    connectivity.recheck().await;

    let progress = ProgressReporter::new();
    progress.subscribe(|s: &ProgressSnapshot| {
        debug!(
            phase = %s.phase,
            completed = s.completed,
            total = s.total,
            item = s.current_label.as_deref().unwrap_or(""),
            "Sync progress"
        );
    });

    let coordinator = Arc::new(SyncCoordinator::new(
        db.clone(),
        remote,
        connectivity.clone(),
        progress,
        config.coordinator_options(),
    ));

    if args.bulk {
        let result = coordinator.sync_bulk().await?;
        println!(
            "Bulk sync {}: {} synced, {} conflicts",
            if result.success { "completed" } else { "failed" },
            result.synced_count,
            result.conflict_count
        );
        for error in &result.errors {
            println!("  {}", error);
        }
        db.close().await;
        return Ok(());
    }

    let probe_loop = connectivity.spawn_probe_loop(ProbeLoopSettings {
        interval: config.probe_interval(),
        initial_backoff: config.initial_backoff(),
        max_backoff: config.max_backoff(),
    });

    let scheduler =
        AutoSyncScheduler::spawn(coordinator.clone(), connectivity, config.sync_interval());
    scheduler.trigger_now().await?;

    let stats = coordinator.stats().await?;
    info!(
        pending = stats.pending_count,
        failed = stats.failed_count,
        online = stats.is_online,
        "Agent running"
    );

    shutdown_signal().await;

    scheduler.shutdown().await?;
    coordinator.shutdown().await;
    probe_loop.shutdown().await?;
    db.close().await;

    info!(
        fired = scheduler.ticks_fired(),
        skipped = scheduler.ticks_skipped(),
        "Agent shutdown complete"
    );
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
