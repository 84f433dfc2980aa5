//! # fieldstock-core: Pure Domain Logic for Fieldstock
//!
//! Records, versioned payload schemas, the snapshot codec and the merge
//! policy. Nothing in this crate performs I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Fieldstock Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              UI / device shell (external consumer)              │   │
//! │  │     enqueue(kind, json) ──► stats() ──► sync() / sync_bulk()    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 fieldstock-sync (engine)                        │   │
//! │  │   Coordinator, remote client, connectivity, progress, scheduler │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ fieldstock-core (THIS CRATE) ★                  │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  payload  │  │ snapshot  │  │   merge   │  │   │
//! │  │   │  Record   │  │ versioned │  │  FSNP v1  │  │ local-wins│  │   │
//! │  │   │SyncResult │  │  schemas  │  │   codec   │  │  policy   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 fieldstock-db (Local Store)                     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Record, statuses, sync results and progress snapshots
//! - [`payload`] - Typed payloads per entity kind with schema versions
//! - [`validation`] - Business rule validation
//! - [`snapshot`] - Whole-database snapshot blob codec
//! - [`merge`] - Snapshot merge engine
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use fieldstock_core::{EntityKind, EntityPayload};
//! use serde_json::json;
//!
//! let payload = EntityPayload::from_wire(
//!     EntityKind::InventoryItem,
//!     json!({ "item_id": "itm-1", "sku": "BOLT-M8", "name": "Bolt", "quantity": 40 }),
//! )
//! .unwrap();
//!
//! payload.validate().unwrap();
//! assert_eq!(payload.entity_id(), "itm-1");
//! assert_eq!(payload.to_wire()["schema_version"], 2);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod merge;
pub mod payload;
pub mod snapshot;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, MergeError, SnapshotError, ValidationError};
pub use merge::{merge, MergeCounts, MergeEntry, MergeResolution, MergedChangeSet};
pub use payload::{
    EntityPayload, InventoryItemPayload, StockMovement, StockTransactionPayload, TransferPayload,
};
pub use snapshot::{Snapshot, SnapshotEntity};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Largest on-hand or movement quantity accepted for a single item.
///
/// ## Business Reason
/// Catches scanner double-reads and fat-fingered counts (typing 100000
/// instead of 100) before they reach the authority.
pub const MAX_STOCK_QUANTITY: i64 = 10_000_000;

/// Maximum length of a logical entity id.
pub const MAX_ENTITY_ID_LEN: usize = 64;

/// Maximum length of a location code.
pub const MAX_LOCATION_LEN: usize = 64;
