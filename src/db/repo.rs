use super::Pool;
use crate::error::{Error, Result};
use crate::model::{Event, EventStatus, SyncStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::HashSet;
use tracing::instrument;

const EVENT_COLUMNS: &str = "id, name, description, date, photographer, album, api_endpoint, \
     access_code, shareable_link, qr_payload, watermark_enabled, backup_enabled, \
     created_at, updated_at, status, sync_status, created_via";

fn row_to_event(row: &SqliteRow) -> Result<Event> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let sync_status: String = row.try_get("sync_status")?;

    let event = Event {
        status: EventStatus::parse(&status).ok_or_else(|| {
            Error::Validation(format!("event {} has unknown status {}", id, status))
        })?,
        sync_status: SyncStatus::parse(&sync_status).ok_or_else(|| {
            Error::Validation(format!("event {} has unknown sync status {}", id, sync_status))
        })?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        date: row.try_get("date")?,
        photographer: row.try_get("photographer")?,
        album: row.try_get("album")?,
        api_endpoint: row.try_get("api_endpoint")?,
        access_code: row.try_get("access_code")?,
        shareable_link: row.try_get("shareable_link")?,
        qr_payload: row.try_get("qr_payload")?,
        watermark_enabled: row.try_get("watermark_enabled")?,
        backup_enabled: row.try_get("backup_enabled")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        created_via: row.try_get("created_via")?,
        id,
    };
    event.validate()?;
    Ok(event)
}

/// Insert a new row, or replace every column of an existing one while
/// keeping its position.
async fn write_event(conn: &mut SqliteConnection, event: &Event) -> Result<()> {
    let sql = format!(
        "INSERT INTO events (position, {EVENT_COLUMNS}) \
         VALUES ((SELECT COALESCE(MAX(position), -1) + 1 FROM events), \
                 ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET \
           name = excluded.name, description = excluded.description, date = excluded.date, \
           photographer = excluded.photographer, album = excluded.album, \
           api_endpoint = excluded.api_endpoint, access_code = excluded.access_code, \
           shareable_link = excluded.shareable_link, qr_payload = excluded.qr_payload, \
           watermark_enabled = excluded.watermark_enabled, backup_enabled = excluded.backup_enabled, \
           created_at = excluded.created_at, updated_at = excluded.updated_at, \
           status = excluded.status, sync_status = excluded.sync_status, \
           created_via = excluded.created_via"
    );
    sqlx::query(&sql)
        .bind(&event.id)
        .bind(&event.name)
        .bind(&event.description)
        .bind(event.date)
        .bind(&event.photographer)
        .bind(&event.album)
        .bind(&event.api_endpoint)
        .bind(&event.access_code)
        .bind(&event.shareable_link)
        .bind(&event.qr_payload)
        .bind(event.watermark_enabled)
        .bind(event.backup_enabled)
        .bind(event.created_at)
        .bind(event.updated_at)
        .bind(event.status.as_str())
        .bind(event.sync_status.as_str())
        .bind(&event.created_via)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// All events in insertion order. An empty store yields an empty list.
#[instrument(skip_all)]
pub async fn load_events(pool: &Pool) -> Result<Vec<Event>> {
    let rows = sqlx::query(&format!(
        "SELECT {EVENT_COLUMNS} FROM events ORDER BY position ASC"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_event).collect()
}

/// Replace the whole collection in one transaction. The active pointer is
/// dropped if its event is not part of the new collection.
#[instrument(skip_all, fields(count = events.len()))]
pub async fn save_events(pool: &Pool, events: &[Event]) -> Result<()> {
    let mut seen = HashSet::new();
    for event in events {
        event.validate()?;
        if !seen.insert(event.id.as_str()) {
            return Err(Error::Validation(format!("duplicate event id {}", event.id)));
        }
    }

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM events").execute(&mut *tx).await?;
    for event in events {
        write_event(&mut *tx, event).await?;
    }
    sqlx::query("DELETE FROM active_event WHERE event_id NOT IN (SELECT id FROM events)")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_event(pool: &Pool, id: &str) -> Result<Option<Event>> {
    let row = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_event).transpose()
}

/// Store one whole record; new ids are appended at the end.
#[instrument(skip_all, fields(event_id = %event.id))]
pub async fn upsert_event(pool: &Pool, event: &Event) -> Result<()> {
    event.validate()?;
    let mut conn = pool.acquire().await?;
    write_event(&mut *conn, event).await
}

/// Remove an event, clearing the active pointer if it referenced it.
/// Returns false when no such event exists.
#[instrument(skip_all)]
pub async fn remove_event(pool: &Pool, id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let removed = sqlx::query("DELETE FROM events WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    sqlx::query("DELETE FROM active_event WHERE event_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(removed > 0)
}

#[instrument(skip_all)]
pub async fn get_active(pool: &Pool) -> Result<Option<Event>> {
    let row = sqlx::query(&format!(
        "SELECT {EVENT_COLUMNS} FROM events \
         WHERE id = (SELECT event_id FROM active_event WHERE id = 1)"
    ))
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_event).transpose()
}

#[instrument(skip_all)]
pub async fn set_active(pool: &Pool, event_id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM events WHERE id = ?")
        .bind(event_id)
        .fetch_one(&mut *tx)
        .await?;
    if exists == 0 {
        return Err(Error::NotFound(event_id.to_string()));
    }
    sqlx::query("INSERT OR REPLACE INTO active_event (id, event_id) VALUES (1, ?)")
        .bind(event_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn clear_active(pool: &Pool) -> Result<()> {
    sqlx::query("DELETE FROM active_event")
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use chrono::{DateTime, NaiveDate, Utc};

    fn event(id: &str, name: &str) -> Event {
        let ts = "2025-01-15T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        Event {
            id: id.into(),
            name: name.into(),
            description: "desc".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            photographer: "Ana".into(),
            album: "Main".into(),
            api_endpoint: "https://gallery.example.com".into(),
            access_code: "ABC123".into(),
            shareable_link: format!("https://gallery.example.com/event/{id}"),
            qr_payload: String::new(),
            watermark_enabled: true,
            backup_enabled: false,
            created_at: ts,
            updated_at: ts,
            status: EventStatus::Active,
            sync_status: SyncStatus::Pending,
            created_via: "cli".into(),
        }
    }

    #[tokio::test]
    async fn empty_store_loads_empty() {
        let pool = memory_pool().await.unwrap();
        assert!(load_events(&pool).await.unwrap().is_empty());
        assert!(get_active(&pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_replaces_and_preserves_order() {
        let pool = memory_pool().await.unwrap();
        let a = event("b-event", "B");
        let b = event("a-event", "A");
        save_events(&pool, &[a.clone(), b.clone()]).await.unwrap();
        assert_eq!(load_events(&pool).await.unwrap(), vec![a.clone(), b.clone()]);

        save_events(&pool, &[b.clone()]).await.unwrap();
        assert_eq!(load_events(&pool).await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn save_rejects_duplicates_without_touching_store() {
        let pool = memory_pool().await.unwrap();
        let a = event("x", "X");
        save_events(&pool, &[a.clone()]).await.unwrap();
        let err = save_events(&pool, &[a.clone(), a.clone()]).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(load_events(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upsert_appends_new_and_keeps_position_of_existing() {
        let pool = memory_pool().await.unwrap();
        upsert_event(&pool, &event("one", "One")).await.unwrap();
        upsert_event(&pool, &event("two", "Two")).await.unwrap();
        let mut changed = event("one", "One renamed");
        changed.sync_status = SyncStatus::Synced;
        upsert_event(&pool, &changed).await.unwrap();

        let all = load_events(&pool).await.unwrap();
        let ids: Vec<_> = all.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["one", "two"]);
        assert_eq!(all[0].name, "One renamed");
        assert_eq!(all[0].sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn active_pointer_lifecycle() {
        let pool = memory_pool().await.unwrap();
        let err = set_active(&pool, "missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        upsert_event(&pool, &event("one", "One")).await.unwrap();
        upsert_event(&pool, &event("two", "Two")).await.unwrap();
        set_active(&pool, "one").await.unwrap();
        assert_eq!(get_active(&pool).await.unwrap().unwrap().id, "one");

        // removing another event keeps the pointer
        assert!(remove_event(&pool, "two").await.unwrap());
        assert_eq!(get_active(&pool).await.unwrap().unwrap().id, "one");

        assert!(remove_event(&pool, "one").await.unwrap());
        assert!(get_active(&pool).await.unwrap().is_none());
        assert!(!remove_event(&pool, "one").await.unwrap());
    }

    #[tokio::test]
    async fn save_dropping_active_event_clears_pointer() {
        let pool = memory_pool().await.unwrap();
        save_events(&pool, &[event("one", "One"), event("two", "Two")])
            .await
            .unwrap();
        set_active(&pool, "two").await.unwrap();
        save_events(&pool, &[event("one", "One")]).await.unwrap();
        assert!(get_active(&pool).await.unwrap().is_none());

        set_active(&pool, "one").await.unwrap();
        clear_active(&pool).await.unwrap();
        assert!(get_active(&pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_enum_value_is_a_validation_error() {
        let pool = memory_pool().await.unwrap();
        upsert_event(&pool, &event("one", "One")).await.unwrap();
        sqlx::query("UPDATE events SET sync_status = 'weird' WHERE id = 'one'")
            .execute(&pool)
            .await
            .unwrap();
        let err = load_events(&pool).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
