//! Configuration loader and validator for the gallery sync agent.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::catalog::CatalogSettings;
use crate::ingest::IngestSettings;
use crate::sync::SyncSettings;
use crate::watcher::WatchSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub watcher: Watcher,
    pub remote: Remote,
    #[serde(default)]
    pub sync: SyncLoop,
    pub upload: Upload,
    pub backup: Backup,
    pub share: Share,
    #[serde(default)]
    pub notify: Notify,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Directory watched for files written by the capture device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Watcher {
    pub watch_dir: String,
    pub poll_interval_ms: u64,
    pub stability_window_ms: u64,
}

/// Remote gallery service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Remote {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub timeout_seconds: u64,
}

/// Sync loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncLoop {
    pub interval_seconds: u64,
    pub max_backoff_seconds: u64,
    pub max_retries: i32,
    pub tombstone_ttl_days: i64,
}

impl Default for SyncLoop {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            max_backoff_seconds: 300,
            max_retries: 3,
            tombstone_ttl_days: 30,
        }
    }
}

/// Photo upload behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Upload {
    pub uploader_name: String,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

/// Local backup of every ingested file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backup {
    pub enabled: bool,
    pub dir: String,
}

/// Public links handed to guests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Share {
    pub base_url: String,
    pub qr_service_url: String,
}

/// Optional webhook receiving ingestion notifications.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notify {
    #[serde(default)]
    pub webhook_url: String,
}

impl Config {
    /// Ensure required directories exist (data, watch and backup dirs).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        for dir in [&self.app.data_dir, &self.watcher.watch_dir, &self.backup.dir] {
            if !dir.trim().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }

    /// SQLite URL of the local store, honoring `DATABASE_URL`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/gallery.db", self.app.data_dir))
    }

    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            poll_interval: Duration::from_millis(self.watcher.poll_interval_ms),
            stability_window: Duration::from_millis(self.watcher.stability_window_ms),
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            interval: Duration::from_secs(self.sync.interval_seconds),
            max_backoff: Duration::from_secs(self.sync.max_backoff_seconds),
            max_retries: self.sync.max_retries,
            tombstone_ttl: chrono::Duration::days(self.sync.tombstone_ttl_days),
            api_endpoint: self.remote.base_url.clone(),
        }
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            backup_enabled: self.backup.enabled,
            backup_dir: PathBuf::from(&self.backup.dir),
            uploader_name: self.upload.uploader_name.clone(),
            max_attempts: self.upload.max_attempts,
            retry_delay: Duration::from_millis(self.upload.retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.upload.max_retry_delay_ms),
        }
    }

    pub fn catalog_settings(&self) -> CatalogSettings {
        CatalogSettings {
            share_base_url: self.share.base_url.clone(),
            qr_service_url: self.share.qr_service_url.clone(),
            api_endpoint: self.remote.base_url.clone(),
        }
    }

    pub fn webhook_url(&self) -> Option<&str> {
        Some(self.notify.webhook_url.trim()).filter(|u| !u.is_empty())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.watcher.watch_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("watcher.watch_dir must be non-empty"));
    }
    if cfg.watcher.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("watcher.poll_interval_ms must be > 0"));
    }
    if cfg.watcher.stability_window_ms < cfg.watcher.poll_interval_ms {
        return Err(ConfigError::Invalid(
            "watcher.stability_window_ms must be >= watcher.poll_interval_ms",
        ));
    }

    if cfg.remote.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("remote.base_url must be non-empty"));
    }
    if reqwest::Url::parse(cfg.remote.base_url.trim()).is_err() {
        return Err(ConfigError::Invalid("remote.base_url must be an absolute URL"));
    }
    if cfg.remote.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("remote.timeout_seconds must be > 0"));
    }

    if cfg.sync.interval_seconds == 0 {
        return Err(ConfigError::Invalid("sync.interval_seconds must be > 0"));
    }
    if cfg.sync.max_retries <= 0 {
        return Err(ConfigError::Invalid("sync.max_retries must be > 0"));
    }
    if cfg.sync.tombstone_ttl_days < 0 {
        return Err(ConfigError::Invalid("sync.tombstone_ttl_days must be >= 0"));
    }

    if cfg.upload.uploader_name.trim().is_empty() {
        return Err(ConfigError::Invalid("upload.uploader_name must be non-empty"));
    }
    if cfg.upload.max_attempts == 0 {
        return Err(ConfigError::Invalid("upload.max_attempts must be > 0"));
    }

    if cfg.backup.enabled && cfg.backup.dir.trim().is_empty() {
        return Err(ConfigError::Invalid("backup.dir must be non-empty when backup is enabled"));
    }

    if cfg.share.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("share.base_url must be non-empty"));
    }
    if reqwest::Url::parse(cfg.share.qr_service_url.trim()).is_err() {
        return Err(ConfigError::Invalid("share.qr_service_url must be an absolute URL"));
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

watcher:
  watch_dir: "./incoming"
  poll_interval_ms: 100
  stability_window_ms: 2000

remote:
  base_url: "https://gallery.example.com/"
  api_key: ""
  timeout_seconds: 30

sync:
  interval_seconds: 30
  max_backoff_seconds: 300
  max_retries: 3
  tombstone_ttl_days: 30

upload:
  uploader_name: "Photo Booth"
  max_attempts: 3
  retry_delay_ms: 5000
  max_retry_delay_ms: 60000

backup:
  enabled: true
  dir: "./data/backup"

share:
  base_url: "https://gallery.example.com"
  qr_service_url: "https://api.qrserver.com/v1/create-qr-code/"

notify:
  webhook_url: ""
"#
}
