//! # Store Metadata Repository
//!
//! Key/value facts about the store itself.
//!
//! | key              | value                         |
//! |------------------|-------------------------------|
//! | `schema_version` | integer, set by migrations    |
//! | `last_sync_time` | RFC 3339, set by sync commits |

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use super::db_time;
use crate::error::{DbError, DbResult};

const LAST_SYNC_TIME: &str = "last_sync_time";
const SCHEMA_VERSION: &str = "schema_version";

/// Repository for `store_meta`.
#[derive(Debug, Clone)]
pub struct MetaRepository {
    pool: SqlitePool,
}

impl MetaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MetaRepository { pool }
    }

    /// Reads a raw value.
    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM store_meta WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    /// Writes a raw value (upsert).
    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        set_on(&mut conn, key, value).await
    }

    /// Time of the last session that synced at least one record.
    pub async fn last_sync_time(&self) -> DbResult<Option<DateTime<Utc>>> {
        match self.get(LAST_SYNC_TIME).await? {
            Some(text) => DateTime::parse_from_rfc3339(&text)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| DbError::corrupt("store_meta", format!("{}: {}", LAST_SYNC_TIME, e))),
            None => Ok(None),
        }
    }

    pub async fn set_last_sync_time(&self, at: DateTime<Utc>) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        set_last_sync_time_on(&mut conn, at).await
    }

    /// Schema version recorded by the last migration.
    pub async fn schema_version(&self) -> DbResult<u32> {
        let text = self
            .get(SCHEMA_VERSION)
            .await?
            .ok_or_else(|| DbError::not_found("store_meta", SCHEMA_VERSION))?;
        text.parse()
            .map_err(|_| DbError::corrupt("store_meta", format!("{} '{}'", SCHEMA_VERSION, text)))
    }
}

async fn set_on(conn: &mut SqliteConnection, key: &str, value: &str) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO store_meta (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn set_last_sync_time_on(
    conn: &mut SqliteConnection,
    at: DateTime<Utc>,
) -> DbResult<()> {
    set_on(conn, LAST_SYNC_TIME, &db_time(at)).await
}
