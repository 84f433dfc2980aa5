//! # Snapshot Codec
//!
//! The whole-database blob exchanged with the authority on the bulk path.
//!
//! ## Blob Layout
//! ```text
//! ┌──────────┬─────────┬──────────────────────────────────────────────────┐
//! │  "FSNP"  │ version │  JSON body                                       │
//! │ 4 bytes  │ 1 byte  │  { "generated_at": "...", "entities": [ ... ] }  │
//! └──────────┴─────────┴──────────────────────────────────────────────────┘
//! ```
//!
//! Each entity carries its own payload schema version so a snapshot can mix
//! entities written by different app versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::SnapshotError;
use crate::payload::EntityPayload;
use crate::types::EntityKind;
use crate::CoreResult;

/// Magic bytes at the start of every snapshot blob.
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"FSNP";

/// Snapshot container format this build writes and the newest it reads.
pub const SNAPSHOT_FORMAT_VERSION: u8 = 1;

/// One entity's authoritative state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntity {
    pub kind: EntityKind,
    pub entity_id: String,
    pub schema_version: u32,
    pub payload: serde_json::Value,
}

impl SnapshotEntity {
    /// Builds an entity from a typed payload in the current schema.
    pub fn from_payload(payload: &EntityPayload) -> Self {
        let kind = payload.kind();
        SnapshotEntity {
            kind,
            entity_id: payload.entity_id().to_string(),
            schema_version: kind.schema_version(),
            payload: payload.to_value(),
        }
    }

    /// Decodes the payload, upgrading older schema versions.
    pub fn typed_payload(&self) -> CoreResult<EntityPayload> {
        EntityPayload::from_value(self.kind, self.schema_version, self.payload.clone())
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotBody {
    generated_at: DateTime<Utc>,
    #[serde(default)]
    entities: Vec<SnapshotEntity>,
}

/// Full entity state of one side of a bulk sync.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub format_version: u8,
    pub generated_at: DateTime<Utc>,
    pub entities: Vec<SnapshotEntity>,
}

impl Snapshot {
    /// Empty snapshot stamped now.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn new(entities: Vec<SnapshotEntity>) -> Self {
        Snapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            generated_at: Utc::now(),
            entities,
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Finds an entity by key.
    pub fn get(&self, kind: EntityKind, entity_id: &str) -> Option<&SnapshotEntity> {
        self.entities
            .iter()
            .find(|e| e.kind == kind && e.entity_id == entity_id)
    }

    /// Serializes to the blob format.
    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        let body = SnapshotBody {
            generated_at: self.generated_at,
            entities: self.entities.clone(),
        };
        let json = serde_json::to_vec(&body)?;

        let mut blob = Vec::with_capacity(SNAPSHOT_MAGIC.len() + 1 + json.len());
        blob.extend_from_slice(SNAPSHOT_MAGIC);
        blob.push(SNAPSHOT_FORMAT_VERSION);
        blob.extend_from_slice(&json);
        Ok(blob)
    }

    /// Parses a blob, rejecting unknown formats and duplicate entity keys.
    pub fn decode(blob: &[u8]) -> Result<Self, SnapshotError> {
        let header_len = SNAPSHOT_MAGIC.len() + 1;
        if blob.len() < header_len || &blob[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadHeader);
        }

        let version = blob[SNAPSHOT_MAGIC.len()];
        if version > SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedFormat {
                found: version,
                supported: SNAPSHOT_FORMAT_VERSION,
            });
        }

        let body: SnapshotBody = serde_json::from_slice(&blob[header_len..])?;

        let mut seen = HashSet::with_capacity(body.entities.len());
        for entity in &body.entities {
            if !seen.insert((entity.kind, entity.entity_id.as_str())) {
                return Err(SnapshotError::DuplicateEntity {
                    kind: entity.kind,
                    entity_id: entity.entity_id.clone(),
                });
            }
        }

        Ok(Snapshot {
            format_version: version,
            generated_at: body.generated_at,
            entities: body.entities,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
