use super::Pool;
use crate::error::{Error, Result};
use crate::model::{Event, SyncAction, SyncQueueItem};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::instrument;

fn row_to_item(row: &SqliteRow) -> Result<SyncQueueItem> {
    let id: i64 = row.try_get("id")?;
    let action: String = row.try_get("action")?;
    let payload: String = row.try_get("payload")?;
    Ok(SyncQueueItem {
        id,
        event_id: row.try_get("event_id")?,
        action: SyncAction::parse(&action).ok_or_else(|| {
            Error::Validation(format!("queue item {} has unknown action {}", id, action))
        })?,
        payload: serde_json::from_str(&payload)?,
        enqueued_at: row.try_get("enqueued_at")?,
        retry_count: row.try_get("retry_count")?,
    })
}

/// Append a pending remote operation carrying a snapshot of `event`.
#[instrument(skip_all, fields(event_id = %event.id, action = action.as_str()))]
pub async fn enqueue(
    pool: &Pool,
    event: &Event,
    action: SyncAction,
    enqueued_at: DateTime<Utc>,
) -> Result<i64> {
    let payload = serde_json::to_string(event)?;
    let id: i64 = sqlx::query(
        "INSERT INTO sync_queue (event_id, action, payload, enqueued_at, retry_count) \
         VALUES (?, ?, ?, ?, 0) RETURNING id",
    )
    .bind(&event.id)
    .bind(action.as_str())
    .bind(payload)
    .bind(enqueued_at)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

/// Every queued item in enqueue order.
#[instrument(skip_all)]
pub async fn queue_items(pool: &Pool) -> Result<Vec<SyncQueueItem>> {
    let rows = sqlx::query(
        "SELECT id, event_id, action, payload, enqueued_at, retry_count \
         FROM sync_queue ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_item).collect()
}

pub async fn queue_items_for(pool: &Pool, event_id: &str) -> Result<Vec<SyncQueueItem>> {
    let rows = sqlx::query(
        "SELECT id, event_id, action, payload, enqueued_at, retry_count \
         FROM sync_queue WHERE event_id = ? ORDER BY id ASC",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_item).collect()
}

pub async fn queue_len(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn remove_queue_item(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM sync_queue WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_queue_retry(pool: &Pool, id: i64, retry_count: i32) -> Result<()> {
    sqlx::query("UPDATE sync_queue SET retry_count = ? WHERE id = ?")
        .bind(retry_count)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::model::{EventStatus, SyncStatus};
    use chrono::NaiveDate;

    fn event(id: &str) -> Event {
        let ts = Utc::now();
        Event {
            id: id.into(),
            name: "Party".into(),
            description: String::new(),
            date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            photographer: String::new(),
            album: String::new(),
            api_endpoint: String::new(),
            access_code: String::new(),
            shareable_link: String::new(),
            qr_payload: String::new(),
            watermark_enabled: false,
            backup_enabled: true,
            created_at: ts,
            updated_at: ts,
            status: EventStatus::Active,
            sync_status: SyncStatus::Pending,
            created_via: "cli".into(),
        }
    }

    #[tokio::test]
    async fn enqueue_keeps_order_and_snapshot() {
        let pool = memory_pool().await.unwrap();
        let a = event("a");
        let b = event("b");
        enqueue(&pool, &a, SyncAction::Create, Utc::now()).await.unwrap();
        enqueue(&pool, &b, SyncAction::Create, Utc::now()).await.unwrap();
        enqueue(&pool, &a, SyncAction::Delete, Utc::now()).await.unwrap();

        let items = queue_items(&pool).await.unwrap();
        let order: Vec<_> = items
            .iter()
            .map(|i| (i.event_id.as_str(), i.action))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a", SyncAction::Create),
                ("b", SyncAction::Create),
                ("a", SyncAction::Delete)
            ]
        );
        assert!(items.iter().all(|i| i.retry_count == 0));
        assert_eq!(items[0].payload, a);
        assert_eq!(queue_items_for(&pool, "a").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn retry_and_remove() {
        let pool = memory_pool().await.unwrap();
        let id = enqueue(&pool, &event("a"), SyncAction::Update, Utc::now())
            .await
            .unwrap();
        set_queue_retry(&pool, id, 2).await.unwrap();
        assert_eq!(queue_items(&pool).await.unwrap()[0].retry_count, 2);
        remove_queue_item(&pool, id).await.unwrap();
        assert_eq!(queue_len(&pool).await.unwrap(), 0);
    }
}
