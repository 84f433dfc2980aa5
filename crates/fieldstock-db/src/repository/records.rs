//! # Record Repository
//!
//! The durable queue of records awaiting the remote authority.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   enqueue ──► pending ──── mark_synced ────► synced ──► prune_synced   │
//! │                 │  ▲                                                    │
//! │     mark_failed │  │ retry / requeue_failed                             │
//! │                 ▼  │                                                    │
//! │                failed  (attempt_count += 1, last_error stored)         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every transition is a single guarded `UPDATE ... WHERE status = ?` so two
//! writers can never both move the same record. When the guard matches no
//! row the current status decides the outcome:
//! - record missing → [`DbError::NotFound`]
//! - already in the target status → idempotent no-op
//! - anything else → [`DbError::InvalidTransition`]

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use fieldstock_core::{EntityKind, EntityPayload, Record, RecordStatus, StoreStats};

use super::db_time;
use super::meta::MetaRepository;
use crate::error::{DbError, DbResult};

const RECORD_COLUMNS: &str = "seq, id, entity_kind, entity_id, payload, schema_version, \
     status, attempt_count, last_error, created_at, updated_at, synced_at";

#[derive(sqlx::FromRow)]
struct RecordRow {
    seq: i64,
    id: String,
    entity_kind: EntityKind,
    entity_id: String,
    payload: String,
    schema_version: i64,
    status: RecordStatus,
    attempt_count: i64,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    synced_at: Option<DateTime<Utc>>,
}

impl TryFrom<RecordRow> for Record {
    type Error = DbError;

    fn try_from(row: RecordRow) -> DbResult<Self> {
        let payload = serde_json::from_str(&row.payload)
            .map_err(|e| DbError::corrupt("records", format!("{}: {}", row.id, e)))?;

        Ok(Record {
            id: row.id,
            entity_kind: row.entity_kind,
            entity_id: row.entity_id,
            payload,
            schema_version: row.schema_version as u32,
            status: row.status,
            attempt_count: row.attempt_count as u32,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            synced_at: row.synced_at,
        })
    }
}

/// One page of pending records in insertion order.
#[derive(Debug, Clone)]
pub struct PendingPage {
    pub records: Vec<Record>,
    /// Pass as `after_seq` to fetch the next page; `None` when exhausted.
    pub next_cursor: Option<i64>,
}

/// Repository for queued records.
#[derive(Debug, Clone)]
pub struct RecordRepository {
    pool: SqlitePool,
}

impl RecordRepository {
    /// Creates a new RecordRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RecordRepository { pool }
    }

    /// Durably queues a payload as a pending record.
    ///
    /// The payload is stored in the kind's current schema version. Callers
    /// validate before enqueueing; only storage failures are reported here.
    pub async fn enqueue(&self, payload: &EntityPayload) -> DbResult<Record> {
        let kind = payload.kind();
        let now = Utc::now();

        let record = Record {
            id: Uuid::now_v7().to_string(),
            entity_kind: kind,
            entity_id: payload.entity_id().to_string(),
            payload: payload.to_value(),
            schema_version: kind.schema_version(),
            status: RecordStatus::Pending,
            attempt_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            synced_at: None,
        };

        let payload_text = serde_json::to_string(&record.payload)
            .map_err(|e| DbError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO records (
                id, entity_kind, entity_id, payload, schema_version,
                status, attempt_count, last_error, created_at, updated_at, synced_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                'pending', 0, NULL, ?6, ?6, NULL
            )
            "#,
        )
        .bind(&record.id)
        .bind(kind.as_str())
        .bind(&record.entity_id)
        .bind(payload_text)
        .bind(record.schema_version as i64)
        .bind(db_time(now))
        .execute(&self.pool)
        .await?;

        debug!(
            record_id = %record.id,
            kind = %kind,
            entity_id = %record.entity_id,
            "Record queued"
        );

        Ok(record)
    }

    /// Gets a record by id.
    pub async fn get(&self, id: &str) -> DbResult<Record> {
        let sql = format!("SELECT {} FROM records WHERE id = ?1", RECORD_COLUMNS);
        let row: Option<RecordRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(DbError::not_found("Record", id)),
        }
    }

    /// Returns all pending records, oldest first.
    ///
    /// The result is materialised from a single SELECT: records enqueued
    /// while the caller iterates are not part of it.
    pub async fn list_pending(&self, kind: Option<EntityKind>) -> DbResult<Vec<Record>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM records
            WHERE status = 'pending' AND (?1 IS NULL OR entity_kind = ?1)
            ORDER BY created_at ASC, seq ASC
            "#,
            RECORD_COLUMNS
        );

        let rows: Vec<RecordRow> = sqlx::query_as(&sql)
            .bind(kind.map(|k| k.as_str()))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Record::try_from).collect()
    }

    /// Restartable paging over pending records in insertion order.
    ///
    /// ## Arguments
    /// * `after_seq` - cursor from the previous page, `None` for the first
    /// * `limit` - maximum records per page
    pub async fn list_pending_page(
        &self,
        kind: Option<EntityKind>,
        after_seq: Option<i64>,
        limit: u32,
    ) -> DbResult<PendingPage> {
        let sql = format!(
            r#"
            SELECT {}
            FROM records
            WHERE status = 'pending'
              AND (?1 IS NULL OR entity_kind = ?1)
              AND seq > ?2
            ORDER BY seq ASC
            LIMIT ?3
            "#,
            RECORD_COLUMNS
        );

        let rows: Vec<RecordRow> = sqlx::query_as(&sql)
            .bind(kind.map(|k| k.as_str()))
            .bind(after_seq.unwrap_or(0))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let next_cursor = if rows.len() as u32 == limit {
            rows.last().map(|r| r.seq)
        } else {
            None
        };

        let records = rows
            .into_iter()
            .map(Record::try_from)
            .collect::<DbResult<Vec<_>>>()?;

        Ok(PendingPage {
            records,
            next_cursor,
        })
    }

    /// Marks a pending record as synced. Already synced is a no-op.
    pub async fn mark_synced(&self, id: &str) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        let changed = mark_synced_on(&mut conn, id, Utc::now()).await?;
        if changed {
            debug!(record_id = %id, "Record synced");
        }
        Ok(())
    }

    /// Marks a pending record as failed, counting the attempt.
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;

        let result = sqlx::query(
            r#"
            UPDATE records SET
                status = 'failed',
                attempt_count = attempt_count + 1,
                last_error = ?2,
                updated_at = ?3
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(db_time(Utc::now()))
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            explain_unchanged(&mut conn, id, RecordStatus::Failed).await?;
        } else {
            debug!(record_id = %id, error = %error, "Record failed");
        }

        Ok(())
    }

    /// Moves one failed record back to pending regardless of its attempts.
    pub async fn retry(&self, id: &str) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;

        let result = sqlx::query(
            "UPDATE records SET status = 'pending', updated_at = ?2 \
             WHERE id = ?1 AND status = 'failed'",
        )
        .bind(id)
        .bind(db_time(Utc::now()))
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            explain_unchanged(&mut conn, id, RecordStatus::Pending).await?;
        }

        Ok(())
    }

    /// Moves failed records with fewer than `max_attempts` attempts back to
    /// pending. Returns how many moved.
    pub async fn requeue_failed(&self, max_attempts: u32) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE records SET status = 'pending', updated_at = ?2 \
             WHERE status = 'failed' AND attempt_count < ?1",
        )
        .bind(max_attempts as i64)
        .bind(db_time(Utc::now()))
        .execute(&self.pool)
        .await?;

        let moved = result.rows_affected();
        if moved > 0 {
            info!(count = moved, max_attempts, "Failed records re-queued");
        }
        Ok(moved)
    }

    /// Moves every failed record back to pending (operator retry).
    pub async fn retry_all_failed(&self) -> DbResult<u64> {
        self.requeue_failed(u32::MAX).await
    }

    /// Marks many records synced in one transaction. Missing or already
    /// synced records are skipped. Returns how many changed.
    pub async fn mark_synced_batch(&self, ids: &[String]) -> DbResult<u64> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let mut changed = 0u64;
        for id in ids {
            match mark_synced_on(&mut tx, id, now).await {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        Ok(changed)
    }

    /// Deletes synced records. Idempotent.
    pub async fn prune_synced(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM records WHERE status = 'synced'")
            .execute(&self.pool)
            .await?;

        let pruned = result.rows_affected();
        if pruned > 0 {
            debug!(count = pruned, "Synced records pruned");
        }
        Ok(pruned)
    }

    /// Counts records in one status.
    pub async fn count_by_status(&self, status: RecordStatus) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE status = ?1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Counts pending records.
    pub async fn count_pending(&self) -> DbResult<i64> {
        self.count_by_status(RecordStatus::Pending).await
    }

    /// Aggregate counters for the UI.
    pub async fn stats(&self) -> DbResult<StoreStats> {
        let rows: Vec<(RecordStatus, EntityKind, i64)> = sqlx::query_as(
            "SELECT status, entity_kind, COUNT(*) FROM records GROUP BY status, entity_kind",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = StoreStats::default();
        for (status, kind, count) in rows {
            match status {
                RecordStatus::Pending => {
                    stats.pending_count += count;
                    *stats.pending_by_kind.entry(kind).or_insert(0) += count;
                }
                RecordStatus::Failed => stats.failed_count += count,
                RecordStatus::Synced => stats.synced_count += count,
            }
        }

        stats.last_sync_time = MetaRepository::new(self.pool.clone())
            .last_sync_time()
            .await?;

        Ok(stats)
    }
}

// =============================================================================
// Connection-level helpers (usable inside a transaction)
// =============================================================================

/// pending → synced. Returns false if the record was already synced.
pub(crate) async fn mark_synced_on(
    conn: &mut SqliteConnection,
    id: &str,
    at: DateTime<Utc>,
) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE records SET
            status = 'synced',
            synced_at = ?2,
            updated_at = ?2
        WHERE id = ?1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(db_time(at))
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(true);
    }

    explain_unchanged(conn, id, RecordStatus::Synced).await
}

async fn current_status(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<RecordStatus>> {
    let status: Option<RecordStatus> =
        sqlx::query_scalar("SELECT status FROM records WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(status)
}

/// Decides what a guarded update that matched no row means.
async fn explain_unchanged(
    conn: &mut SqliteConnection,
    id: &str,
    target: RecordStatus,
) -> DbResult<bool> {
    match current_status(conn, id).await? {
        None => Err(DbError::not_found("Record", id)),
        Some(current) if current == target => Ok(false),
        Some(current) => Err(DbError::InvalidTransition {
            id: id.to_string(),
            from: current,
            to: target,
        }),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::TimeZone;
    use fieldstock_core::{InventoryItemPayload, StockMovement, StockTransactionPayload};

    async fn setup() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn item(id: &str, qty: i64) -> EntityPayload {
        EntityPayload::InventoryItem(InventoryItemPayload {
            item_id: id.into(),
            sku: format!("SKU-{}", id),
            name: "Widget".into(),
            quantity: qty,
            unit: Some("pcs".into()),
            location: None,
            barcode: None,
        })
    }

    fn receipt(id: &str) -> EntityPayload {
        EntityPayload::StockTransaction(StockTransactionPayload {
            transaction_id: id.into(),
            item_id: "itm-1".into(),
            movement: StockMovement::Receipt,
            quantity: 3,
            reference: None,
            occurred_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
        })
    }

    #[tokio::test]
    async fn test_enqueue_and_get() {
        let db = setup().await;
        let record = db.records().enqueue(&item("A", 5)).await.unwrap();

        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.attempt_count, 0);
        assert_eq!(record.schema_version, 2);

        let loaded = db.records().get(&record.id).await.unwrap();
        assert_eq!(loaded.entity_id, "A");
        assert_eq!(loaded.payload, record.payload);
        assert_eq!(loaded.typed_payload().unwrap(), item("A", 5));
    }

    #[tokio::test]
    async fn test_pending_count_matches_enqueued() {
        let db = setup().await;
        for i in 0..7 {
            db.records().enqueue(&item(&format!("I{}", i), i)).await.unwrap();
        }
        db.records().enqueue(&receipt("T1")).await.unwrap();

        assert_eq!(db.records().count_pending().await.unwrap(), 8);

        let stats = db.records().stats().await.unwrap();
        assert_eq!(stats.pending_count, 8);
        assert_eq!(stats.pending_for(EntityKind::InventoryItem), 7);
        assert_eq!(stats.pending_for(EntityKind::StockTransaction), 1);
        assert_eq!(stats.pending_for(EntityKind::Transfer), 0);
    }

    #[tokio::test]
    async fn test_list_pending_is_oldest_first_and_filtered() {
        let db = setup().await;
        let a = db.records().enqueue(&item("A", 1)).await.unwrap();
        let t = db.records().enqueue(&receipt("T1")).await.unwrap();
        let b = db.records().enqueue(&item("B", 1)).await.unwrap();

        let all = db.records().list_pending(None).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![a.id.clone(), t.id.clone(), b.id.clone()]);

        let items = db
            .records()
            .list_pending(Some(EntityKind::InventoryItem))
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|r| r.entity_kind == EntityKind::InventoryItem));
    }

    #[tokio::test]
    async fn test_list_pending_is_a_snapshot() {
        let db = setup().await;
        db.records().enqueue(&item("A", 1)).await.unwrap();

        let listed = db.records().list_pending(None).await.unwrap();
        db.records().enqueue(&item("B", 1)).await.unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(db.records().list_pending(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_pending_page() {
        let db = setup().await;
        for i in 0..5 {
            db.records().enqueue(&item(&format!("I{}", i), 1)).await.unwrap();
        }

        let first = db.records().list_pending_page(None, None, 2).await.unwrap();
        assert_eq!(first.records.len(), 2);
        let second = db
            .records()
            .list_pending_page(None, first.next_cursor, 2)
            .await
            .unwrap();
        assert_eq!(second.records.len(), 2);
        let third = db
            .records()
            .list_pending_page(None, second.next_cursor, 2)
            .await
            .unwrap();
        assert_eq!(third.records.len(), 1);
        assert!(third.next_cursor.is_none());
        assert_eq!(third.records[0].entity_id, "I4");
    }

    #[tokio::test]
    async fn test_mark_synced_twice_is_noop() {
        let db = setup().await;
        let record = db.records().enqueue(&item("A", 1)).await.unwrap();

        db.records().mark_synced(&record.id).await.unwrap();
        let first = db.records().get(&record.id).await.unwrap();

        db.records().mark_synced(&record.id).await.unwrap();
        let second = db.records().get(&record.id).await.unwrap();

        assert_eq!(first.status, RecordStatus::Synced);
        assert_eq!(first, second);
        assert_eq!(db.records().count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let db = setup().await;
        assert!(db.records().mark_synced("nope").await.unwrap_err().is_not_found());
        assert!(db
            .records()
            .mark_failed("nope", "boom")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(db.records().get("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_mark_failed_counts_attempts() {
        let db = setup().await;
        let record = db.records().enqueue(&item("A", 1)).await.unwrap();

        db.records().mark_failed(&record.id, "HTTP 500").await.unwrap();
        let failed = db.records().get(&record.id).await.unwrap();
        assert_eq!(failed.status, RecordStatus::Failed);
        assert_eq!(failed.attempt_count, 1);
        assert_eq!(failed.last_error.as_deref(), Some("HTTP 500"));

        db.records().retry(&record.id).await.unwrap();
        db.records().mark_failed(&record.id, "HTTP 502").await.unwrap();
        let again = db.records().get(&record.id).await.unwrap();
        assert_eq!(again.attempt_count, 2);
    }

    #[tokio::test]
    async fn test_synced_is_terminal() {
        let db = setup().await;
        let record = db.records().enqueue(&item("A", 1)).await.unwrap();
        db.records().mark_synced(&record.id).await.unwrap();

        let err = db.records().mark_failed(&record.id, "late").await.unwrap_err();
        assert!(matches!(err, DbError::InvalidTransition { .. }));

        let err = db.records().retry(&record.id).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_requeue_failed_respects_max_attempts() {
        let db = setup().await;
        let a = db.records().enqueue(&item("A", 1)).await.unwrap();
        let b = db.records().enqueue(&item("B", 1)).await.unwrap();

        db.records().mark_failed(&a.id, "x").await.unwrap();
        for _ in 0..3 {
            db.records().retry(&b.id).await.unwrap();
            db.records().mark_failed(&b.id, "x").await.unwrap();
        }

        let moved = db.records().requeue_failed(2).await.unwrap();
        assert_eq!(moved, 1);
        assert_eq!(db.records().get(&a.id).await.unwrap().status, RecordStatus::Pending);
        assert_eq!(db.records().get(&b.id).await.unwrap().status, RecordStatus::Failed);

        assert_eq!(db.records().retry_all_failed().await.unwrap(), 1);
        assert_eq!(db.records().count_by_status(RecordStatus::Failed).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_and_prune() {
        let db = setup().await;
        let a = db.records().enqueue(&item("A", 1)).await.unwrap();
        let b = db.records().enqueue(&item("B", 1)).await.unwrap();
        db.records().enqueue(&item("C", 1)).await.unwrap();

        let changed = db
            .records()
            .mark_synced_batch(&[a.id.clone(), b.id.clone(), "missing".into()])
            .await
            .unwrap();
        assert_eq!(changed, 2);

        assert_eq!(db.records().prune_synced().await.unwrap(), 2);
        assert_eq!(db.records().prune_synced().await.unwrap(), 0);
        assert_eq!(db.records().count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_synced_status_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fieldstock.db");

        let id = {
            let db = Database::new(DbConfig::new(&path)).await.unwrap();
            let a = db.records().enqueue(&item("A", 1)).await.unwrap();
            db.records().enqueue(&item("B", 1)).await.unwrap();
            db.records().mark_synced(&a.id).await.unwrap();
            db.close().await;
            a.id
        };

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        assert_eq!(db.records().get(&id).await.unwrap().status, RecordStatus::Synced);
        assert_eq!(db.records().count_pending().await.unwrap(), 1);
    }
}
