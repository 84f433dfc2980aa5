//! # Snapshot Merge Engine
//!
//! Reconciles the authority's snapshot with the records still pending on
//! this device.
//!
//! ## Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Resolution per entity                               │
//! │                                                                         │
//! │  local pending │ remote        │ resolution     │ merged value          │
//! │  ──────────────┼───────────────┼────────────────┼─────────────────────  │
//! │  yes           │ absent        │ AppliedLocal   │ local                 │
//! │  yes           │ equal value   │ AppliedLocal   │ local (= remote)      │
//! │  yes           │ other value   │ Conflict       │ local                 │
//! │  no            │ present       │ AppliedRemote  │ remote                │
//! │                                                                         │
//! │  Several pending records for one entity: the newest is the local      │
//! │  value and carries the resolution; older ones are superseded and       │
//! │  resolve AppliedLocal.                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Local wins on push; the authoritative snapshot wins for every entity with
//! no local pending change. Field-level or timestamp-based merging is not
//! attempted.
//!
//! `merge` is pure. It returns a complete change set or a [`MergeError`];
//! nothing is written anywhere until the caller commits the result.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ts_rs::TS;

use crate::error::MergeError;
use crate::payload::EntityPayload;
use crate::snapshot::{Snapshot, SnapshotEntity};
use crate::types::{EntityKind, Record};

/// Outcome for one entry of the change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "kebab-case")]
pub enum MergeResolution {
    AppliedLocal,
    AppliedRemote,
    Conflict,
}

/// One reconciled record or remote-only entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeEntry {
    pub kind: EntityKind,
    pub entity_id: String,
    /// Local record this entry resolves; `None` for remote-only entities.
    pub record_id: Option<String>,
    pub resolution: MergeResolution,
}

/// Aggregate counts of a change set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub applied_local: usize,
    pub applied_remote: usize,
    pub conflicts: usize,
}

/// Result of one merge. Lives only for the duration of a sync session.
#[derive(Debug, Clone)]
pub struct MergedChangeSet {
    /// Local records first (input order), then remote-only entities.
    pub entries: Vec<MergeEntry>,
    /// State to upload and to keep as the local replica.
    pub merged: Snapshot,
}

impl MergedChangeSet {
    pub fn conflict_count(&self) -> usize {
        self.conflicts().count()
    }

    /// Entries resolved as conflicts.
    pub fn conflicts(&self) -> impl Iterator<Item = &MergeEntry> {
        self.entries
            .iter()
            .filter(|e| e.resolution == MergeResolution::Conflict)
    }

    /// Local records that may be marked synced once the merged snapshot is
    /// accepted by the authority.
    pub fn synced_record_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.resolution == MergeResolution::AppliedLocal)
            .filter_map(|e| e.record_id.clone())
            .collect()
    }

    pub fn counts(&self) -> MergeCounts {
        let mut counts = MergeCounts::default();
        for entry in &self.entries {
            match entry.resolution {
                MergeResolution::AppliedLocal => counts.applied_local += 1,
                MergeResolution::AppliedRemote => counts.applied_remote += 1,
                MergeResolution::Conflict => counts.conflicts += 1,
            }
        }
        counts
    }
}

type EntityKey = (EntityKind, String);

/// Merges locally pending records into the remote snapshot.
///
/// `local_pending` is expected oldest first, as returned by the local
/// store; among records of equal `created_at` the later one is newer.
pub fn merge(local_pending: &[Record], remote: &Snapshot) -> Result<MergedChangeSet, MergeError> {
    // Decode everything up front so a bad document aborts before any result
    // is assembled.
    let mut local: Vec<(&Record, EntityPayload)> = Vec::with_capacity(local_pending.len());
    for record in local_pending {
        let payload = record
            .typed_payload()
            .map_err(|e| MergeError::UnreadableRecord {
                record_id: record.id.clone(),
                reason: e.to_string(),
            })?;
        local.push((record, payload));
    }

    let mut remote_values: HashMap<EntityKey, EntityPayload> =
        HashMap::with_capacity(remote.entities.len());
    for entity in &remote.entities {
        let payload = entity
            .typed_payload()
            .map_err(|e| MergeError::UnreadableRemote {
                kind: entity.kind,
                entity_id: entity.entity_id.clone(),
                reason: e.to_string(),
            })?;
        remote_values.insert((entity.kind, entity.entity_id.clone()), payload);
    }

    // Newest local record per entity (index into `local`).
    let mut newest: HashMap<EntityKey, usize> = HashMap::new();
    for (idx, (record, _)) in local.iter().enumerate() {
        let key = (record.entity_kind, record.entity_id.clone());
        match newest.get(&key) {
            Some(&current) if local[current].0.created_at > record.created_at => {}
            _ => {
                newest.insert(key, idx);
            }
        }
    }

    let mut entries = Vec::with_capacity(local.len() + remote.entities.len());
    for (idx, (record, payload)) in local.iter().enumerate() {
        let key = (record.entity_kind, record.entity_id.clone());
        let is_newest = newest.get(&key) == Some(&idx);

        let resolution = match remote_values.get(&key) {
            Some(remote_payload) if is_newest && remote_payload != payload => {
                MergeResolution::Conflict
            }
            _ => MergeResolution::AppliedLocal,
        };

        entries.push(MergeEntry {
            kind: record.entity_kind,
            entity_id: record.entity_id.clone(),
            record_id: Some(record.id.clone()),
            resolution,
        });
    }

    // Merged state: remote order first with local winners substituted,
    // then entities only known locally.
    let mut merged_entities: Vec<SnapshotEntity> = Vec::with_capacity(remote.entities.len());
    for entity in &remote.entities {
        let key = (entity.kind, entity.entity_id.clone());
        match newest.get(&key) {
            Some(&idx) => merged_entities.push(SnapshotEntity::from_payload(&local[idx].1)),
            None => {
                entries.push(MergeEntry {
                    kind: entity.kind,
                    entity_id: entity.entity_id.clone(),
                    record_id: None,
                    resolution: MergeResolution::AppliedRemote,
                });
                merged_entities.push(entity.clone());
            }
        }
    }

    for (idx, (record, payload)) in local.iter().enumerate() {
        let key = (record.entity_kind, record.entity_id.clone());
        if newest.get(&key) == Some(&idx) && !remote_values.contains_key(&key) {
            merged_entities.push(SnapshotEntity::from_payload(payload));
        }
    }

    Ok(MergedChangeSet {
        entries,
        merged: Snapshot::new(merged_entities),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
