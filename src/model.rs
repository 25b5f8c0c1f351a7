use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "synced" => Some(SyncStatus::Synced),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Active,
    Completed,
    Archived,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Active => "active",
            EventStatus::Completed => "completed",
            EventStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(EventStatus::Active),
            "completed" => Some(EventStatus::Completed),
            "archived" => Some(EventStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(SyncAction::Create),
            "update" => Some(SyncAction::Update),
            "delete" => Some(SyncAction::Delete),
            _ => None,
        }
    }
}

/// A photo session: the unit that owns an album, access code and share link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub name: String,
    pub description: String,
    pub date: NaiveDate,
    pub photographer: String,
    pub album: String,
    pub api_endpoint: String,
    pub access_code: String,
    pub shareable_link: String,
    pub qr_payload: String,
    pub watermark_enabled: bool,
    pub backup_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: EventStatus,
    pub sync_status: SyncStatus,
    pub created_via: String,
}

impl Event {
    /// Record a local mutation: `updated_at` moves strictly forward and the
    /// record needs pushing again.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        let floor = self.updated_at + Duration::milliseconds(1);
        self.updated_at = now.max(floor);
        self.sync_status = SyncStatus::Pending;
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("event id must be non-empty".into()));
        }
        if self.id.contains('/') || self.id.chars().any(char::is_whitespace) {
            return Err(Error::Validation(format!(
                "event id {:?} must not contain '/' or whitespace",
                self.id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(Error::Validation(format!(
                "event {} must have a non-empty name",
                self.id
            )));
        }
        if self.updated_at < self.created_at {
            return Err(Error::Validation(format!(
                "event {} was updated before it was created",
                self.id
            )));
        }
        Ok(())
    }
}

/// Entry of the durable sync queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncQueueItem {
    pub id: i64,
    pub event_id: String,
    pub action: SyncAction,
    pub payload: Event,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileClass {
    Image,
    RawImage,
    Other,
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "heic", "heif", "webp", "tif", "tiff"];
const RAW_EXTENSIONS: &[&str] = &[
    "cr2", "cr3", "nef", "nrw", "arw", "dng", "raf", "orf", "rw2", "pef", "srw",
];

impl FileClass {
    pub fn classify(path: &Path) -> Self {
        let Some(ext) = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|s| s.to_ascii_lowercase())
        else {
            return FileClass::Other;
        };
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            FileClass::Image
        } else if RAW_EXTENSIONS.contains(&ext.as_str()) {
            FileClass::RawImage
        } else {
            FileClass::Other
        }
    }

    /// Backup subdirectory for this class.
    pub fn backup_dir(&self) -> &'static str {
        match self {
            FileClass::Image => "images",
            FileClass::RawImage => "raw",
            FileClass::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestedFile {
    pub path: PathBuf,
    pub name: String,
    pub class: FileClass,
    pub first_seen_at: DateTime<Utc>,
    pub stable_at: DateTime<Utc>,
    pub processed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        let ts = "2025-01-15T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        Event {
            id: "wedding-2025-01-15".into(),
            name: "Wedding".into(),
            description: String::new(),
            date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            photographer: String::new(),
            album: String::new(),
            api_endpoint: String::new(),
            access_code: "ABC123".into(),
            shareable_link: String::new(),
            qr_payload: String::new(),
            watermark_enabled: false,
            backup_enabled: true,
            created_at: ts,
            updated_at: ts,
            status: EventStatus::Active,
            sync_status: SyncStatus::Synced,
            created_via: "cli".into(),
        }
    }

    #[test]
    fn touch_is_strictly_increasing_even_with_a_stale_clock() {
        let mut e = sample();
        let before = e.updated_at;
        e.touch(before - Duration::hours(1));
        assert!(e.updated_at > before);
        assert_eq!(e.sync_status, SyncStatus::Pending);

        let later = before + Duration::minutes(5);
        e.touch(later);
        assert_eq!(e.updated_at, later);
    }

    #[test]
    fn validate_rejects_bad_records() {
        let mut e = sample();
        e.validate().unwrap();
        e.name = "  ".into();
        assert!(matches!(e.validate(), Err(Error::Validation(_))));

        let mut e = sample();
        e.id = "a/b".into();
        assert!(matches!(e.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn classify_by_extension() {
        assert_eq!(FileClass::classify(Path::new("a/IMG_001.JPG")), FileClass::Image);
        assert_eq!(FileClass::classify(Path::new("DSC_1.nef")), FileClass::RawImage);
        assert_eq!(FileClass::classify(Path::new("clip.mov")), FileClass::Other);
        assert_eq!(FileClass::classify(Path::new("README")), FileClass::Other);
    }

    #[test]
    fn enum_strings_round_trip() {
        for s in [SyncStatus::Pending, SyncStatus::Synced, SyncStatus::Failed] {
            assert_eq!(SyncStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(SyncAction::parse("delete"), Some(SyncAction::Delete));
        assert_eq!(EventStatus::parse("bogus"), None);
    }
}
