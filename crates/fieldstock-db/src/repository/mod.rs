//! # Repository Module
//!
//! Repository implementations for the local store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  SyncCoordinator / UI                                                  │
//! │       │                                                                 │
//! │       │  db.records().list_pending(None)                               │
//! │       ▼                                                                 │
//! │  RecordRepository                                                      │
//! │  ├── enqueue / get / list_pending / list_pending_page                  │
//! │  ├── mark_synced / mark_failed / retry / requeue_failed                │
//! │  └── mark_synced_batch / prune_synced / stats                          │
//! │                                                                         │
//! │  MetaRepository      last_sync_time, schema_version                    │
//! │  ReplicaRepository   authority state after the last bulk sync          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Functions suffixed `_on` take a `&mut SqliteConnection` so they can run
//! inside a caller's transaction (see `Database::commit_bulk`).

use chrono::{DateTime, SecondsFormat, Utc};

pub mod meta;
pub mod records;
pub mod replica;

/// Fixed-width RFC 3339 text; lexical order equals time order.
pub(crate) fn db_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
