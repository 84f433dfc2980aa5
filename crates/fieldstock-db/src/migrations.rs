//! # Database Migrations
//!
//! Embedded SQL migrations and the store schema version check.
//!
//! ## Open Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Migration Process                                  │
//! │                                                                         │
//! │  Database::new(config)                                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  check_schema_version ── store_meta.schema_version > SCHEMA_VERSION?   │
//! │       │                        └── yes → DbError::SchemaTooNew         │
//! │       ▼                                                                 │
//! │  MIGRATOR.run ── applies pending files from migrations/sqlite          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Store ready; no record operation runs before this point               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Adding New Migrations
//!
//! 1. Create `migrations/sqlite/NNNN_description.sql`
//! 2. End it with `UPDATE store_meta SET value = 'N' WHERE key = 'schema_version'`
//! 3. Bump [`SCHEMA_VERSION`]
//! 4. **NEVER** modify existing migrations

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::error::{DbError, DbResult};

/// Store schema version this build reads and writes.
pub const SCHEMA_VERSION: u32 = 1;

/// Embedded migrations from the `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations after checking the on-disk version.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    check_schema_version(pool).await?;

    info!("Checking for pending migrations");
    MIGRATOR.run(pool).await?;

    info!(schema_version = SCHEMA_VERSION, "All migrations applied successfully");
    Ok(())
}

/// Fails with [`DbError::SchemaTooNew`] if a newer build wrote this store.
///
/// A fresh database (no `store_meta` table yet) passes.
pub async fn check_schema_version(pool: &SqlitePool) -> DbResult<()> {
    let has_meta: Option<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'store_meta'",
    )
    .fetch_optional(pool)
    .await?;

    if has_meta.is_none() {
        return Ok(());
    }

    let stored: Option<String> =
        sqlx::query_scalar("SELECT value FROM store_meta WHERE key = 'schema_version'")
            .fetch_optional(pool)
            .await?;

    let Some(stored) = stored else {
        return Ok(());
    };

    let found: u32 = stored
        .parse()
        .map_err(|_| DbError::corrupt("store_meta", format!("schema_version '{}'", stored)))?;

    if found > SCHEMA_VERSION {
        warn!(
            found,
            supported = SCHEMA_VERSION,
            "Database was written by a newer version"
        );
        return Err(DbError::SchemaTooNew {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    Ok(())
}

/// Returns (total_migrations, applied_migrations) for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}

// =============================================================================
// Unit Tests
// =============================================================================
