//! # fieldstock-db: Local Store for Fieldstock
//!
//! Durable on-device storage for records awaiting the remote authority.
//! SQLite via sqlx, one file per device.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Fieldstock Data Flow                             │
//! │                                                                         │
//! │  UI enqueue ───────────────┐        ┌──────── SyncCoordinator          │
//! │                            ▼        ▼                                   │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  fieldstock-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ RecordRepo    │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ MetaRepo      │    │ 0001_initial │  │   │
//! │  │   │ commit_bulk   │    │ ReplicaRepo   │    │ version gate │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │   <data dir>/fieldstock.db   (WAL, synchronous = FULL)          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fieldstock_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("fieldstock.db")).await?;
//! let record = db.records().enqueue(&payload).await?;
//! let pending = db.records().list_pending(None).await?;
//! db.records().mark_synced(&record.id).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use migrations::SCHEMA_VERSION;
pub use pool::{Database, DbConfig, DEFAULT_DB_FILE};

pub use repository::meta::MetaRepository;
pub use repository::records::{PendingPage, RecordRepository};
pub use repository::replica::ReplicaRepository;
