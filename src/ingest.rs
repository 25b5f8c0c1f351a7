//! Ingestion pipeline: classify, back up, then upload each settled file.
//!
//! Every step fails independently. A failed backup never prevents the
//! upload, and a failed upload never affects other files.

use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::db::{self, Pool};
use crate::model::{Event, FileClass, IngestedFile};
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::remote::{PhotoUpload, RemoteStore};
use crate::transform::{NoTransform, PhotoTransform};
use crate::watcher::{ReadyFile, WatchEvent};

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub backup_enabled: bool,
    pub backup_dir: PathBuf,
    pub uploader_name: String,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAnImage,
    NoActiveEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { photo_id: String, attempts: u32 },
    /// Terminal: retries are exhausted or the error is permanent.
    Failed { attempts: u32, error: String },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestReport {
    /// The name was already handled by this pipeline.
    Duplicate { name: String },
    Processed {
        file: IngestedFile,
        backup: Option<PathBuf>,
        upload: UploadOutcome,
    },
}

pub struct IngestPipeline {
    pool: Pool,
    remote: Arc<dyn RemoteStore>,
    notifier: Arc<dyn Notifier>,
    transform: Arc<dyn PhotoTransform>,
    settings: IngestSettings,
    seen: Mutex<HashSet<String>>,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl IngestPipeline {
    pub fn new(
        pool: Pool,
        remote: Arc<dyn RemoteStore>,
        notifier: Arc<dyn Notifier>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            pool,
            remote,
            notifier,
            transform: Arc::new(NoTransform),
            settings,
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn PhotoTransform>) -> Self {
        self.transform = transform;
        self
    }

    /// Claim `name` for processing; false if it was seen before.
    fn claim(&self, name: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        seen.insert(name.to_string())
    }

    #[instrument(skip_all, fields(file = %ready.path.display()))]
    pub async fn on_file_ready(&self, ready: ReadyFile) -> IngestReport {
        let name = file_name(&ready.path);
        if !self.claim(&name) {
            debug!(name = %name, "already ingested; skipping");
            return IngestReport::Duplicate { name };
        }

        let class = FileClass::classify(&ready.path);
        let mut file = IngestedFile {
            path: ready.path,
            name,
            class,
            first_seen_at: ready.first_seen_at,
            stable_at: ready.stable_at,
            processed: false,
        };

        let active = match db::get_active(&self.pool).await {
            Ok(active) => active,
            Err(err) => {
                warn!(?err, "failed to read active event");
                None
            }
        };

        let backup = self.backup(&file, active.as_ref()).await;

        let upload = match (class, active) {
            (FileClass::Image, Some(event)) => self.upload(&file, &event).await,
            (FileClass::Image, None) => {
                warn!(name = %file.name, "no active event; photo not uploaded");
                self.notifier.notify(Notification {
                    kind: NotificationKind::Failure,
                    upload_id: Uuid::new_v4().to_string(),
                    file_name: file.name.clone(),
                    event_id: None,
                    photo_id: None,
                    message: "no active event".into(),
                });
                UploadOutcome::Skipped(SkipReason::NoActiveEvent)
            }
            _ => UploadOutcome::Skipped(SkipReason::NotAnImage),
        };

        file.processed = true;
        IngestReport::Processed {
            file,
            backup,
            upload,
        }
    }

    async fn backup(&self, file: &IngestedFile, active: Option<&Event>) -> Option<PathBuf> {
        if !self.settings.backup_enabled || active.is_some_and(|e| !e.backup_enabled) {
            return None;
        }
        let dir = self.settings.backup_dir.join(file.class.backup_dir());
        let dest = dir.join(&file.name);
        let copied = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::copy(&file.path, &dest).await
        }
        .await;
        match copied {
            Ok(bytes) => {
                debug!(dest = %dest.display(), bytes, "backed up");
                Some(dest)
            }
            Err(err) => {
                warn!(?err, dest = %dest.display(), "backup failed");
                None
            }
        }
    }

    async fn upload(&self, file: &IngestedFile, event: &Event) -> UploadOutcome {
        let upload_id = Uuid::new_v4().to_string();
        let notify = |kind, photo_id: Option<String>, message: String| {
            self.notifier.notify(Notification {
                kind,
                upload_id: upload_id.clone(),
                file_name: file.name.clone(),
                event_id: Some(event.id.clone()),
                photo_id,
                message,
            });
        };
        notify(NotificationKind::Start, None, format!("uploading to {}", event.id));

        let bytes = match tokio::fs::read(&file.path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(?err, "failed to read photo");
                notify(NotificationKind::Failure, None, format!("read failed: {err}"));
                return UploadOutcome::Failed {
                    attempts: 0,
                    error: err.to_string(),
                };
            }
        };
        let bytes = self.prepare(event, &file.name, bytes);

        let photo = PhotoUpload {
            file_name: file.name.clone(),
            bytes,
            uploader_name: self.settings.uploader_name.clone(),
            album_name: event.album.clone(),
        };

        let mut backoff = Backoff::new(self.settings.retry_delay, self.settings.max_retry_delay);
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.remote.upload_photo(&event.id, photo.clone()).await {
                Ok(photo_id) => {
                    info!(event_id = %event.id, photo_id = %photo_id, attempts, "photo uploaded");
                    notify(NotificationKind::Success, Some(photo_id.clone()), "uploaded".into());
                    return UploadOutcome::Uploaded { photo_id, attempts };
                }
                Err(err) if err.is_transient() && attempts < max_attempts => {
                    let delay = backoff.next_delay();
                    warn!(%err, attempts, ?delay, "upload failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(%err, attempts, "upload failed; giving up");
                    notify(NotificationKind::Failure, None, err.to_string());
                    return UploadOutcome::Failed {
                        attempts,
                        error: err.to_string(),
                    };
                }
            }
        }
    }

    fn prepare(&self, event: &Event, name: &str, bytes: Vec<u8>) -> Vec<u8> {
        if !event.watermark_enabled || !self.transform.is_available() {
            return bytes;
        }
        match self.transform.apply(event, name, bytes.clone()) {
            Ok(transformed) => transformed,
            Err(err) => {
                warn!(?err, "photo transform failed; uploading original");
                bytes
            }
        }
    }

    /// Feed watcher events into the pipeline. Each file runs as its own task
    /// so detection keeps going while uploads are in flight.
    pub async fn run<S>(self: Arc<Self>, events: S)
    where
        S: Stream<Item = WatchEvent>,
    {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            match event {
                WatchEvent::Ready(file) => {
                    let pipeline = Arc::clone(&self);
                    tokio::spawn(async move {
                        pipeline.on_file_ready(file).await;
                    });
                }
                WatchEvent::Error { path, message } => {
                    warn!(path = %path.display(), error = %message, "watcher error");
                }
            }
        }
    }
}
