//! # Replica Repository
//!
//! The authority's entity state as of the last successful bulk sync. Lets
//! the device read reconciled stock levels while offline.
//!
//! Only `Database::commit_bulk` replaces it during sync, always in the same
//! transaction that marks the merged records synced.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use fieldstock_core::{EntityKind, SnapshotEntity};

use super::db_time;
use crate::error::{DbError, DbResult};

#[derive(sqlx::FromRow)]
struct ReplicaRow {
    kind: EntityKind,
    entity_id: String,
    schema_version: i64,
    payload: String,
}

impl TryFrom<ReplicaRow> for SnapshotEntity {
    type Error = DbError;

    fn try_from(row: ReplicaRow) -> DbResult<Self> {
        let payload = serde_json::from_str(&row.payload).map_err(|e| {
            DbError::corrupt("replica_entities", format!("{}/{}: {}", row.kind, row.entity_id, e))
        })?;

        Ok(SnapshotEntity {
            kind: row.kind,
            entity_id: row.entity_id,
            schema_version: row.schema_version as u32,
            payload,
        })
    }
}

/// Repository for `replica_entities`.
#[derive(Debug, Clone)]
pub struct ReplicaRepository {
    pool: SqlitePool,
}

impl ReplicaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ReplicaRepository { pool }
    }

    /// Replaces the whole replica in one transaction.
    pub async fn replace_all(&self, entities: &[SnapshotEntity]) -> DbResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        replace_all_on(&mut tx, entities, Utc::now()).await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))
    }

    pub async fn get(&self, kind: EntityKind, entity_id: &str) -> DbResult<Option<SnapshotEntity>> {
        let row: Option<ReplicaRow> = sqlx::query_as(
            "SELECT kind, entity_id, schema_version, payload FROM replica_entities \
             WHERE kind = ?1 AND entity_id = ?2",
        )
        .bind(kind.as_str())
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SnapshotEntity::try_from).transpose()
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM replica_entities")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Lists entities, optionally of one kind, ordered by kind then id.
    pub async fn list(&self, kind: Option<EntityKind>) -> DbResult<Vec<SnapshotEntity>> {
        let rows: Vec<ReplicaRow> = sqlx::query_as(
            "SELECT kind, entity_id, schema_version, payload FROM replica_entities \
             WHERE ?1 IS NULL OR kind = ?1 \
             ORDER BY kind, entity_id",
        )
        .bind(kind.map(|k| k.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SnapshotEntity::try_from).collect()
    }
}

pub(crate) async fn replace_all_on(
    conn: &mut SqliteConnection,
    entities: &[SnapshotEntity],
    at: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query("DELETE FROM replica_entities")
        .execute(&mut *conn)
        .await?;

    let updated_at = db_time(at);
    for entity in entities {
        let payload = serde_json::to_string(&entity.payload)
            .map_err(|e| DbError::Internal(e.to_string()))?;

        sqlx::query(
            "INSERT INTO replica_entities (kind, entity_id, schema_version, payload, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(entity.kind.as_str())
        .bind(&entity.entity_id)
        .bind(entity.schema_version as i64)
        .bind(payload)
        .bind(&updated_at)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}
