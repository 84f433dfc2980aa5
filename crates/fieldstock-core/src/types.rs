//! # Domain Types
//!
//! Core domain types used throughout Fieldstock.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Record       │   │  RecordStatus   │   │   EntityKind    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID v7)   │   │  Pending        │   │  InventoryItem  │       │
//! │  │  entity_kind    │   │  Synced (final) │   │  StockTransact. │       │
//! │  │  entity_id      │   │  Failed         │   │  Transfer       │       │
//! │  │  payload (JSON) │   └─────────────────┘   └─────────────────┘       │
//! │  │  attempt_count  │                                                    │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ProgressSnapshot │   │   SyncResult    │   │   StoreStats    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  total          │   │  success        │   │  pending_count  │       │
//! │  │  completed      │   │  synced/failed  │   │  pending_by_kind│       │
//! │  │  current_label  │   │  conflicts      │   │  last_sync_time │       │
//! │  │  phase          │   │  errors         │   └─────────────────┘       │
//! │  └─────────────────┘   └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Record Lifecycle
//! ```text
//!            enqueue
//!               │
//!               ▼
//!          ┌─────────┐   push ok    ┌────────┐
//!          │ PENDING │ ───────────► │ SYNCED │ ──► prune_synced()
//!          └─────────┘              └────────┘
//!             │   ▲
//!   push fail │   │ retry (manual or automatic)
//!             ▼   │
//!          ┌─────────┐
//!          │ FAILED  │  attempt_count += 1 on every failed push
//!          └─────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::payload::EntityPayload;

// =============================================================================
// Entity Kind
// =============================================================================

/// The kind of inventory entity a record mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// An inventory item (SKU, name, on-hand quantity).
    InventoryItem,
    /// A stock movement against an item.
    StockTransaction,
    /// A transfer of stock between two locations.
    Transfer,
}

impl EntityKind {
    /// All kinds, in a stable order.
    pub const ALL: [EntityKind; 3] = [
        EntityKind::InventoryItem,
        EntityKind::StockTransaction,
        EntityKind::Transfer,
    ];

    /// Canonical snake_case name (also the database value).
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityKind::InventoryItem => "inventory_item",
            EntityKind::StockTransaction => "stock_transaction",
            EntityKind::Transfer => "transfer",
        }
    }

    /// Path segment of the authority's per-kind REST endpoint
    /// (`POST /api/{endpoint}`).
    pub const fn endpoint(&self) -> &'static str {
        match self {
            EntityKind::InventoryItem => "inventory",
            EntityKind::StockTransaction => "transactions",
            EntityKind::Transfer => "transfers",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inventory_item" | "inventory" => Ok(EntityKind::InventoryItem),
            "stock_transaction" | "transaction" | "transactions" => {
                Ok(EntityKind::StockTransaction)
            }
            "transfer" | "transfers" => Ok(EntityKind::Transfer),
            other => Err(CoreError::UnknownEntityKind(other.to_string())),
        }
    }
}

// =============================================================================
// Record Status
// =============================================================================

/// Lifecycle status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Waiting to be pushed.
    Pending,
    /// Accepted by the authority. Terminal; eligible for pruning.
    Synced,
    /// Last push failed; will be re-queued.
    Failed,
}

impl RecordStatus {
    /// Canonical snake_case name (also the database value).
    pub const fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Synced => "synced",
            RecordStatus::Failed => "failed",
        }
    }

    /// Returns true if `self → next` is a legal lifecycle transition.
    ///
    /// Only pending→synced, pending→failed and failed→pending are allowed.
    pub const fn can_transition_to(&self, next: RecordStatus) -> bool {
        matches!(
            (self, next),
            (RecordStatus::Pending, RecordStatus::Synced)
                | (RecordStatus::Pending, RecordStatus::Failed)
                | (RecordStatus::Failed, RecordStatus::Pending)
        )
    }

    /// Returns true for the terminal state.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Synced)
    }
}

impl Default for RecordStatus {
    fn default() -> Self {
        RecordStatus::Pending
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecordStatus::Pending),
            "synced" => Ok(RecordStatus::Synced),
            "failed" => Ok(RecordStatus::Failed),
            other => Err(CoreError::UnknownRecordStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Record
// =============================================================================

/// The unit of synchronization: one locally queued inventory mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Record {
    /// UUID v7, time ordered so IDs sort by creation.
    pub id: String,

    /// Kind of entity this record mutates.
    pub entity_kind: EntityKind,

    /// Logical entity key (item_id, transaction_id, transfer_id).
    pub entity_id: String,

    /// Payload in the kind's current schema.
    #[ts(type = "unknown")]
    pub payload: serde_json::Value,

    /// Schema version the payload was written with.
    pub schema_version: u32,

    /// Lifecycle status.
    pub status: RecordStatus,

    /// Failed pushes so far. Never decreases.
    pub attempt_count: u32,

    /// Last push error, if any.
    pub last_error: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    #[ts(as = "Option<String>")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl Record {
    /// Decodes the payload into its typed schema.
    pub fn typed_payload(&self) -> CoreResult<EntityPayload> {
        EntityPayload::from_value(self.entity_kind, self.schema_version, self.payload.clone())
    }

    /// Human-readable description for progress reporting.
    pub fn label(&self) -> String {
        match self.typed_payload() {
            Ok(payload) => payload.label(),
            Err(_) => format!("{} {}", self.entity_kind, self.entity_id),
        }
    }

    /// Returns true if the record still needs to reach the authority.
    pub fn is_unsynced(&self) -> bool {
        !self.status.is_terminal()
    }
}

// =============================================================================
// Sync Phase / Mode
// =============================================================================

/// Phase of the sync session as observed by progress subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Syncing,
    Completed,
    Failed,
}

impl Default for SyncPhase {
    fn default() -> Self {
        SyncPhase::Idle
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Idle => write!(f, "idle"),
            SyncPhase::Syncing => write!(f, "syncing"),
            SyncPhase::Completed => write!(f, "completed"),
            SyncPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Which path a session took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Per-record push against the REST endpoints.
    Incremental,
    /// Snapshot download, merge, upload.
    Bulk,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Incremental => write!(f, "incremental"),
            SyncMode::Bulk => write!(f, "bulk"),
        }
    }
}

// =============================================================================
// Progress Snapshot
// =============================================================================

/// Observable state of the running (or last) sync session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProgressSnapshot {
    /// Records enumerated at session start.
    pub total: u32,
    /// Records processed so far. Never exceeds `total`.
    pub completed: u32,
    /// Description of the in-flight item.
    pub current_label: Option<String>,
    pub phase: SyncPhase,
}

impl ProgressSnapshot {
    /// Idle snapshot with zero counters.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Completion ratio in `[0.0, 1.0]` (display only).
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return if self.phase == SyncPhase::Completed { 1.0 } else { 0.0 };
        }
        f64::from(self.completed) / f64::from(self.total)
    }
}

// =============================================================================
// Sync Result
// =============================================================================

/// Error string reported when the authority is unreachable.
pub const OFFLINE_ERROR: &str = "offline";

/// Error string reported when a session was cancelled.
pub const CANCELLED_ERROR: &str = "cancelled";

/// Immutable outcome of one sync session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncResult {
    pub success: bool,
    pub mode: SyncMode,
    pub synced_count: u32,
    pub failed_count: u32,
    pub conflict_count: u32,
    /// Ordered error descriptions; empty on success.
    pub errors: Vec<String>,
    #[ts(as = "String")]
    pub completed_at: DateTime<Utc>,
}

impl SyncResult {
    /// Builds a result from session counters. Success means no errors.
    pub fn new(
        mode: SyncMode,
        synced_count: u32,
        failed_count: u32,
        conflict_count: u32,
        errors: Vec<String>,
    ) -> Self {
        SyncResult {
            success: errors.is_empty(),
            mode,
            synced_count,
            failed_count,
            conflict_count,
            errors,
            completed_at: Utc::now(),
        }
    }

    /// Session refused because the authority is unreachable.
    pub fn offline(mode: SyncMode) -> Self {
        Self::new(mode, 0, 0, 0, vec![OFFLINE_ERROR.to_string()])
    }

    /// Session stopped by `cancel()`. Counters reflect work done before the
    /// cancellation was observed.
    pub fn cancelled(mode: SyncMode, synced_count: u32, failed_count: u32) -> Self {
        Self::new(
            mode,
            synced_count,
            failed_count,
            0,
            vec![CANCELLED_ERROR.to_string()],
        )
    }

    /// Terminal phase this result maps to.
    pub fn phase(&self) -> SyncPhase {
        if self.success {
            SyncPhase::Completed
        } else {
            SyncPhase::Failed
        }
    }

    /// Returns true if this session was cancelled.
    pub fn was_cancelled(&self) -> bool {
        self.errors.iter().any(|e| e == CANCELLED_ERROR)
    }
}

// =============================================================================
// Store Statistics
// =============================================================================

/// Aggregate counters of the local store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StoreStats {
    /// Records with status = pending.
    pub pending_count: i64,
    /// Pending records per entity kind (kinds with zero are omitted).
    pub pending_by_kind: BTreeMap<EntityKind, i64>,
    /// Records with status = failed.
    pub failed_count: i64,
    /// Synced records not yet pruned.
    pub synced_count: i64,
    #[ts(as = "Option<String>")]
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl StoreStats {
    /// Pending count for one kind.
    pub fn pending_for(&self, kind: EntityKind) -> i64 {
        self.pending_by_kind.get(&kind).copied().unwrap_or(0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
