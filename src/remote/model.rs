use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Event, EventStatus, SyncStatus};

fn default_true() -> bool {
    true
}

/// Event as stored by the remote gallery service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub access_code: String,
    #[serde(default)]
    pub shareable_link: String,
    #[serde(default)]
    pub qr_code: String,
    #[serde(default)]
    pub photographer_name: String,
    #[serde(default)]
    pub album_name: String,
    #[serde(default)]
    pub watermark_enabled: bool,
    #[serde(default = "default_true")]
    pub backup_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub created_via: String,
}

impl From<&Event> for RemoteEvent {
    fn from(e: &Event) -> Self {
        Self {
            id: e.id.clone(),
            name: e.name.clone(),
            description: e.description.clone(),
            date: e.date,
            access_code: e.access_code.clone(),
            shareable_link: e.shareable_link.clone(),
            qr_code: e.qr_payload.clone(),
            photographer_name: e.photographer.clone(),
            album_name: e.album.clone(),
            watermark_enabled: e.watermark_enabled,
            backup_enabled: e.backup_enabled,
            created_at: e.created_at,
            updated_at: e.updated_at,
            created_via: e.created_via.clone(),
        }
    }
}

impl RemoteEvent {
    /// Local record for an event first seen through a pull.
    pub fn into_local(self, api_endpoint: &str) -> Event {
        Event {
            id: self.id,
            name: self.name,
            description: self.description,
            date: self.date,
            photographer: self.photographer_name,
            album: self.album_name,
            api_endpoint: api_endpoint.to_string(),
            access_code: self.access_code,
            shareable_link: self.shareable_link,
            qr_payload: self.qr_code,
            watermark_enabled: self.watermark_enabled,
            backup_enabled: self.backup_enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
            status: EventStatus::Active,
            sync_status: SyncStatus::Synced,
            created_via: if self.created_via.is_empty() {
                "remote".to_string()
            } else {
                self.created_via
            },
        }
    }

    /// Overwrite the remotely-owned fields of `local`. Local-only fields
    /// (status, api endpoint) are kept.
    pub fn apply_to(&self, local: &mut Event) {
        local.name = self.name.clone();
        local.description = self.description.clone();
        local.date = self.date;
        local.access_code = self.access_code.clone();
        local.shareable_link = self.shareable_link.clone();
        local.qr_payload = self.qr_code.clone();
        local.photographer = self.photographer_name.clone();
        local.album = self.album_name.clone();
        local.watermark_enabled = self.watermark_enabled;
        local.backup_enabled = self.backup_enabled;
        local.created_at = self.created_at;
        local.updated_at = self.updated_at;
        if !self.created_via.is_empty() {
            local.created_via = self.created_via.clone();
        }
        local.sync_status = SyncStatus::Synced;
    }
}

/// Photo handed to the ingestion endpoint.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub uploader_name: String,
    pub album_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadPhotoResponse {
    pub id: String,
}
