use super::model::{SyncMeta, Tombstone};
use super::Pool;
use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::instrument;

#[instrument(skip_all)]
pub async fn sync_meta(pool: &Pool) -> Result<SyncMeta> {
    let row = sqlx::query("SELECT last_sync_at, sync_count FROM sync_meta WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(SyncMeta {
            last_sync_at: None,
            sync_count: 0,
        });
    };
    Ok(SyncMeta {
        last_sync_at: row.try_get("last_sync_at")?,
        sync_count: row.try_get("sync_count")?,
    })
}

/// The pull cursor; the Unix epoch if nothing was ever pulled.
pub async fn last_sync_timestamp(pool: &Pool) -> Result<DateTime<Utc>> {
    Ok(sync_meta(pool)
        .await?
        .last_sync_at
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH))
}

/// Move the pull cursor, optionally bumping the sync counter.
#[instrument(skip_all)]
pub async fn set_last_sync(pool: &Pool, at: DateTime<Utc>, count_sync: bool) -> Result<()> {
    sqlx::query(
        "INSERT INTO sync_meta (id, last_sync_at, sync_count) VALUES (1, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET last_sync_at = excluded.last_sync_at, \
         sync_count = sync_meta.sync_count + excluded.sync_count",
    )
    .bind(at)
    .bind(i64::from(count_sync))
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn put_tombstone(pool: &Pool, event_id: &str, deleted_at: DateTime<Utc>) -> Result<()> {
    sqlx::query("INSERT OR REPLACE INTO tombstones (event_id, deleted_at) VALUES (?, ?)")
        .bind(event_id)
        .bind(deleted_at)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn tombstone(pool: &Pool, event_id: &str) -> Result<Option<Tombstone>> {
    let row = sqlx::query("SELECT event_id, deleted_at FROM tombstones WHERE event_id = ?")
        .bind(event_id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(Tombstone {
        event_id: row.try_get("event_id")?,
        deleted_at: row.try_get("deleted_at")?,
    }))
}

pub async fn remove_tombstone(pool: &Pool, event_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM tombstones WHERE event_id = ?")
        .bind(event_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Drop tombstones recorded before `cutoff`. Returns how many were purged.
#[instrument(skip_all)]
pub async fn purge_tombstones(pool: &Pool, cutoff: DateTime<Utc>) -> Result<u64> {
    // Timestamps are compared in Rust; the TEXT encoding is not guaranteed
    // to sort chronologically.
    let rows = sqlx::query("SELECT event_id, deleted_at FROM tombstones")
        .fetch_all(pool)
        .await?;
    let mut purged = 0;
    for row in rows {
        let deleted_at: DateTime<Utc> = row.try_get("deleted_at")?;
        if deleted_at < cutoff {
            let event_id: String = row.try_get("event_id")?;
            remove_tombstone(pool, &event_id).await?;
            purged += 1;
        }
    }
    Ok(purged)
}
