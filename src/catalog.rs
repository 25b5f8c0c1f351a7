//! Local event commands. Every mutation lands in the store and the sync
//! queue; pushing is left to the sync engine.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{self, Pool};
use crate::error::{Error, Result};
use crate::model::{Event, EventStatus, SyncAction, SyncStatus};

static NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug regex"));

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub share_base_url: String,
    pub qr_service_url: String,
    pub api_endpoint: String,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Derived from name and date when absent.
    pub id: Option<String>,
    pub name: String,
    pub date: NaiveDate,
    pub description: String,
    pub photographer: String,
    /// Defaults to the event name.
    pub album: Option<String>,
    /// Generated when absent.
    pub access_code: Option<String>,
    pub watermark_enabled: bool,
    pub backup_enabled: bool,
    pub created_via: String,
}

impl NewEvent {
    pub fn new(name: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            id: None,
            name: name.into(),
            date,
            description: String::new(),
            photographer: String::new(),
            album: None,
            access_code: None,
            watermark_enabled: false,
            backup_enabled: true,
            created_via: "cli".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
    pub photographer: Option<String>,
    pub album: Option<String>,
    pub access_code: Option<String>,
    pub watermark_enabled: Option<bool>,
    pub backup_enabled: Option<bool>,
    pub status: Option<EventStatus>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.date.is_none()
            && self.photographer.is_none()
            && self.album.is_none()
            && self.access_code.is_none()
            && self.watermark_enabled.is_none()
            && self.backup_enabled.is_none()
            && self.status.is_none()
    }

    fn apply(self, event: &mut Event) {
        if let Some(v) = self.name {
            event.name = v;
        }
        if let Some(v) = self.description {
            event.description = v;
        }
        if let Some(v) = self.date {
            event.date = v;
        }
        if let Some(v) = self.photographer {
            event.photographer = v;
        }
        if let Some(v) = self.album {
            event.album = v;
        }
        if let Some(v) = self.access_code {
            event.access_code = v;
        }
        if let Some(v) = self.watermark_enabled {
            event.watermark_enabled = v;
        }
        if let Some(v) = self.backup_enabled {
            event.backup_enabled = v;
        }
        if let Some(v) = self.status {
            event.status = v;
        }
    }
}

/// `"Wedding"` on 2025-01-15 becomes `wedding-2025-01-15`.
pub fn event_id(name: &str, date: NaiveDate) -> String {
    let lowered = name.to_lowercase();
    let slug = NON_SLUG.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "event" } else { slug };
    format!("{}-{}", slug, date.format("%Y-%m-%d"))
}

pub fn shareable_link(base_url: &str, event_id: &str) -> String {
    format!("{}/event/{}", base_url.trim_end_matches('/'), event_id)
}

pub fn qr_payload(service_url: &str, link: &str) -> Result<String> {
    let url = Url::parse_with_params(service_url, &[("size", "300x300"), ("data", link)])
        .map_err(|err| Error::Validation(format!("invalid QR service url {service_url}: {err}")))?;
    Ok(url.to_string())
}

fn access_code() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_uppercase()
}

pub struct Catalog {
    pool: Pool,
    clock: Arc<dyn Clock>,
    settings: CatalogSettings,
}

impl Catalog {
    pub fn new(pool: Pool, clock: Arc<dyn Clock>, settings: CatalogSettings) -> Self {
        Self {
            pool,
            clock,
            settings,
        }
    }

    #[instrument(skip_all, fields(name = %new.name))]
    pub async fn create(&self, new: NewEvent) -> Result<Event> {
        let id = new
            .id
            .clone()
            .unwrap_or_else(|| event_id(&new.name, new.date));
        if db::get_event(&self.pool, &id).await?.is_some() {
            return Err(Error::Validation(format!("event {id} already exists")));
        }
        let now = self.clock.now();
        let link = shareable_link(&self.settings.share_base_url, &id);
        let event = Event {
            qr_payload: qr_payload(&self.settings.qr_service_url, &link)?,
            shareable_link: link,
            album: new.album.unwrap_or_else(|| new.name.clone()),
            access_code: new.access_code.unwrap_or_else(access_code),
            id,
            name: new.name,
            description: new.description,
            date: new.date,
            photographer: new.photographer,
            api_endpoint: self.settings.api_endpoint.clone(),
            watermark_enabled: new.watermark_enabled,
            backup_enabled: new.backup_enabled,
            created_at: now,
            updated_at: now,
            status: EventStatus::Active,
            sync_status: SyncStatus::Pending,
            created_via: new.created_via,
        };
        db::upsert_event(&self.pool, &event).await?;
        db::enqueue(&self.pool, &event, SyncAction::Create, now).await?;
        info!(event_id = %event.id, "event created");
        Ok(event)
    }

    pub async fn list(&self) -> Result<Vec<Event>> {
        db::load_events(&self.pool).await
    }

    pub async fn get(&self, id: &str) -> Result<Event> {
        db::get_event(&self.pool, id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    #[instrument(skip_all, fields(event_id = %id))]
    pub async fn update(&self, id: &str, patch: EventPatch) -> Result<Event> {
        let mut event = self.get(id).await?;
        patch.apply(&mut event);
        let now = self.clock.now();
        event.touch(now);
        event.validate()?;
        db::upsert_event(&self.pool, &event).await?;
        db::enqueue(&self.pool, &event, SyncAction::Update, now).await?;
        info!("event updated");
        Ok(event)
    }

    /// Delete locally and queue the remote delete. A tombstone keeps stale
    /// remote copies from being pulled back in.
    #[instrument(skip_all, fields(event_id = %id))]
    pub async fn delete(&self, id: &str) -> Result<Event> {
        let event = self.get(id).await?;
        if !db::remove_event(&self.pool, id).await? {
            return Err(Error::NotFound(id.to_string()));
        }
        let now = self.clock.now();
        db::put_tombstone(&self.pool, id, now.max(event.updated_at)).await?;
        db::enqueue(&self.pool, &event, SyncAction::Delete, now).await?;
        info!("event deleted");
        Ok(event)
    }

    pub async fn activate(&self, id: &str) -> Result<Event> {
        let event = self.get(id).await?;
        db::set_active(&self.pool, id).await?;
        info!(event_id = %id, "event activated");
        Ok(event)
    }

    pub async fn current(&self) -> Result<Option<Event>> {
        db::get_active(&self.pool).await
    }

    /// Create an event dated today and make it the upload target.
    pub async fn quick(&self, name: Option<String>) -> Result<Event> {
        let date = self.clock.now().date_naive();
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "Quick Event".to_string());

        let base = event_id(&name, date);
        let mut id = base.clone();
        let mut n = 2;
        while db::get_event(&self.pool, &id).await?.is_some() {
            id = format!("{base}-{n}");
            n += 1;
        }

        let mut new = NewEvent::new(name, date);
        new.id = Some(id);
        new.created_via = "quick".to_string();
        let event = self.create(new).await?;
        db::set_active(&self.pool, &event.id).await?;
        Ok(event)
    }

    pub async fn export(&self) -> Result<String> {
        let events = self.list().await?;
        Ok(serde_json::to_string_pretty(&events)?)
    }
}
