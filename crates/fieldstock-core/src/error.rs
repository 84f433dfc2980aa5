//! # Error Types
//!
//! Domain-specific error types for fieldstock-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  fieldstock-core errors (this file)                                    │
//! │  ├── CoreError        - Payload decoding / schema version failures     │
//! │  ├── ValidationError  - Input validation failures                      │
//! │  ├── SnapshotError    - Snapshot blob cannot be decoded                │
//! │  └── MergeError       - Merge aborted, nothing may be committed        │
//! │                                                                         │
//! │  fieldstock-db errors (separate crate)                                 │
//! │  └── DbError          - Local store failures (StorageError family)     │
//! │                                                                         │
//! │  fieldstock-sync errors (separate crate)                               │
//! │  ├── TransportError   - Remote authority unreachable / non-2xx         │
//! │  └── SyncError        - What engine callers see                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::EntityKind;

// =============================================================================
// Core Error
// =============================================================================

/// Payload and schema errors.
///
/// These are raised when a JSON document cannot be turned into a typed
/// payload of the expected entity kind.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The document was written by a newer schema than this build knows.
    ///
    /// ## When This Occurs
    /// - A newer app version queued records, then the device was downgraded
    /// - The authority already serves a newer payload shape
    #[error("{kind} schema version {found} is newer than supported version {supported}")]
    UnsupportedSchemaVersion {
        kind: EntityKind,
        found: u32,
        supported: u32,
    },

    /// The document does not match the payload shape for its kind.
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: EntityKind, reason: String },

    /// Unknown entity kind string.
    #[error("Unknown entity kind: '{0}'")]
    UnknownEntityKind(String),

    /// Unknown record status string.
    #[error("Unknown record status: '{0}'")]
    UnknownRecordStatus(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before anything is written to the local store, so a malformed
/// payload never becomes a pending record.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid characters in a SKU).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Two fields that must differ are equal.
    #[error("{field} must differ from {other}")]
    MustDiffer { field: String, other: String },
}

// =============================================================================
// Snapshot Error
// =============================================================================

/// Errors decoding a snapshot blob.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Blob does not start with the snapshot magic bytes.
    #[error("Not a snapshot blob (bad header)")]
    BadHeader,

    /// Blob was produced by a newer snapshot format.
    #[error("Snapshot format version {found} is newer than supported version {supported}")]
    UnsupportedFormat { found: u8, supported: u8 },

    /// Body is not valid snapshot JSON.
    #[error("Malformed snapshot body: {0}")]
    Malformed(String),

    /// The same entity appears twice.
    #[error("Duplicate entity in snapshot: {kind}/{entity_id}")]
    DuplicateEntity { kind: EntityKind, entity_id: String },
}

impl From<serde_json::Error> for SnapshotError {
    fn from(err: serde_json::Error) -> Self {
        SnapshotError::Malformed(err.to_string())
    }
}

// =============================================================================
// Merge Error
// =============================================================================

/// Fatal merge failure. The bulk path is aborted and every record stays
/// pending; the next cycle may retry.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Remote snapshot could not be decoded.
    #[error("Remote snapshot rejected: {0}")]
    Snapshot(#[from] SnapshotError),

    /// A local record's payload could not be decoded.
    #[error("Local record {record_id} is unreadable: {reason}")]
    UnreadableRecord { record_id: String, reason: String },

    /// A remote entity could not be decoded into its kind's schema.
    #[error("Remote entity {kind}/{entity_id} is unreadable: {reason}")]
    UnreadableRemote {
        kind: EntityKind,
        entity_id: String,
        reason: String,
    },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
