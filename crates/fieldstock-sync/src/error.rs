//! # Sync Error Types
//!
//! Error types for the transport and for the engine as a whole.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Session             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Unreachable    │  │  AlreadySyncing         │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  ShuttingDown           │ │
//! │  │  ConfigLoad/Save│  │  Http / Auth    │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Storage      │  │  Payload/Merge  │                              │
//! │  │                 │  │                 │                              │
//! │  │  DbError        │  │  CoreError      │                              │
//! │  │  (fatal unless  │  │  Validation     │                              │
//! │  │   NotFound)     │  │  Merge/Snapshot │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only `AlreadySyncing` and storage failures escape a sync session as
//! `Err`. Every transport, merge or snapshot failure is folded into the
//! session's `SyncResult`.

use std::time::Duration;

use fieldstock_core::{CoreError, MergeError, SnapshotError, ValidationError};
use fieldstock_db::DbError;
use thiserror::Error;

/// Result type alias for engine operations.
///
/// Named `EngineResult` because `SyncResult` is the session outcome type.
pub type EngineResult<T> = Result<T, SyncError>;

// =============================================================================
// Transport Error
// =============================================================================

/// Failure talking to the remote authority.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Could not connect (DNS, refused, reset).
    #[error("Authority unreachable: {0}")]
    Unreachable(String),

    /// No complete response within the request timeout.
    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Authority answered with a non-2xx status.
    ///
    /// `message` is the authority's `{error}` text when the body carried one.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// No usable bearer token.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Request or response body could not be encoded/decoded.
    #[error("Encoding failed: {0}")]
    Encoding(String),
}

impl TransportError {
    /// Returns true if retrying the same request later can succeed.
    ///
    /// Auth and encoding failures need operator action first.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Auth(_) | TransportError::Encoding(_))
    }

    /// Returns true if the failure says nothing reached the authority.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            TransportError::Unreachable(_) | TransportError::Timeout(_)
        )
    }

    /// HTTP status code, if the authority answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// =============================================================================
// Sync Error
// =============================================================================

/// Engine error type.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid authority URL.
    #[error("Invalid authority URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// A sync session is already running.
    #[error("A sync session is already in progress")]
    AlreadySyncing,

    /// Engine is shutting down.
    #[error("Sync engine is shutting down")]
    ShuttingDown,

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// Remote authority failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Local store failure.
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    /// Payload could not be decoded or upgraded.
    #[error(transparent)]
    Payload(#[from] CoreError),

    /// Payload failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Snapshot merge failed.
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// Snapshot encode/decode failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried later.
    ///
    /// ## Retryable Errors
    /// - Retryable transport failures
    /// - A concurrent session (try again when it ends)
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(err) => err.is_retryable(),
            SyncError::AlreadySyncing => true,
            SyncError::Storage(DbError::PoolExhausted) => true,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the local store is unusable and the session must stop.
    ///
    /// A missing record is not fatal; the caller treats it as already
    /// resolved.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Storage(err) => !err.is_not_found(),
            _ => false,
        }
    }
}
