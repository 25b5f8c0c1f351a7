//! Remote sync engine.
//!
//! Local state is authoritative. Mutations are recorded in the sync queue
//! and pushed whenever the remote answers; remote changes are pulled by
//! update time and merged last-writer-wins on `updated_at`.
//!
//! Per-event status: `pending -> synced` on an acknowledged push,
//! `pending -> failed -> pending` when a push fails and is requeued.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::backoff::Backoff;
use crate::clock::Clock;
use crate::db::{self, Pool};
use crate::error::{Error, RemoteError, Result};
use crate::model::{Event, SyncAction, SyncQueueItem, SyncStatus};
use crate::remote::{RemoteEvent, RemoteStore};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub interval: Duration,
    pub max_backoff: Duration,
    /// Queue items are dropped once they failed this many times.
    pub max_retries: i32,
    pub tombstone_ttl: chrono::Duration,
    /// Recorded on events first seen through a pull.
    pub api_endpoint: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
            max_retries: 3,
            tombstone_ttl: chrono::Duration::days(30),
            api_endpoint: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Synced,
    Failed(String),
    Offline,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub offline: bool,
    pub succeeded: usize,
    pub failed: usize,
    /// Items removed after exhausting their retries.
    pub abandoned: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub offline: bool,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub tombstoned: usize,
    /// Remote records that failed validation and were skipped.
    pub rejected: usize,
}

impl PullReport {
    pub fn changed(&self) -> bool {
        self.inserted + self.updated > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pushed: usize,
    pub drain: DrainReport,
    pub pull: PullReport,
}

impl SyncReport {
    pub fn online(&self) -> bool {
        !self.drain.offline && !self.pull.offline
    }
}

pub struct SyncEngine {
    pool: Pool,
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
}

impl SyncEngine {
    pub fn new(
        pool: Pool,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            pool,
            remote,
            clock,
            settings,
        }
    }

    pub async fn is_online(&self) -> bool {
        match self.remote.ping().await {
            Ok(()) => true,
            Err(err) => {
                debug!(%err, "remote offline");
                false
            }
        }
    }

    /// Create-or-update on the remote, keyed by event id.
    async fn push_remote(&self, event: &Event) -> Result<(), RemoteError> {
        let remote = RemoteEvent::from(event);
        match self.remote.fetch_event(&event.id).await? {
            // Last writer wins on push too; the next pull brings the newer copy in.
            Some(existing) if existing.updated_at > event.updated_at => {
                debug!(event_id = %event.id, "remote copy is newer; not overwriting");
                Ok(())
            }
            Some(_) => self.remote.update_event(&remote).await,
            None => self.remote.create_event(&remote).await,
        }
    }

    /// Set the stored status of `event_id`, leaving every other field and
    /// `updated_at` alone. With `only_if_current`, the status is only
    /// written when the stored record still has that `updated_at`.
    async fn mark(
        &self,
        event_id: &str,
        status: SyncStatus,
        only_if_current: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let Some(mut stored) = db::get_event(&self.pool, event_id).await? else {
            return Ok(());
        };
        if only_if_current.is_some_and(|at| stored.updated_at != at) {
            return Ok(());
        }
        if stored.sync_status != status {
            stored.sync_status = status;
            db::upsert_event(&self.pool, &stored).await?;
        }
        Ok(())
    }

    /// Push one event now. The local status follows the outcome.
    #[instrument(skip_all, fields(event_id = %event.id))]
    pub async fn push_event(&self, event: &Event) -> Result<PushOutcome> {
        if !self.is_online().await {
            return Ok(PushOutcome::Offline);
        }
        match self.push_remote(event).await {
            Ok(()) => {
                self.mark(&event.id, SyncStatus::Synced, Some(event.updated_at))
                    .await?;
                info!("event pushed");
                Ok(PushOutcome::Synced)
            }
            Err(err) => {
                warn!(%err, "push failed");
                self.mark(&event.id, SyncStatus::Failed, None).await?;
                Ok(PushOutcome::Failed(err.to_string()))
            }
        }
    }

    /// Delete on the remote now. On success any queued delete for the event
    /// is dropped; on failure exactly one delete stays queued.
    #[instrument(skip_all, fields(event_id = %event.id))]
    pub async fn delete_remote(&self, event: &Event) -> Result<bool> {
        let result = if self.is_online().await {
            self.remote.delete_event(&event.id).await
        } else {
            Err(RemoteError::Unreachable("offline".into()))
        };
        let queued: Vec<i64> = db::queue_items_for(&self.pool, &event.id)
            .await?
            .into_iter()
            .filter(|item| item.action == SyncAction::Delete)
            .map(|item| item.id)
            .collect();
        match result {
            Ok(()) => {
                for id in queued {
                    db::remove_queue_item(&self.pool, id).await?;
                }
                info!("remote event deleted");
                Ok(true)
            }
            Err(err) => {
                warn!(%err, "remote delete failed; queued");
                if queued.is_empty() {
                    db::enqueue(&self.pool, event, SyncAction::Delete, self.clock.now()).await?;
                }
                Ok(false)
            }
        }
    }

    /// Returns the `updated_at` of the record that was pushed, if any.
    async fn process_item(&self, item: &SyncQueueItem) -> Result<Option<DateTime<Utc>>> {
        match item.action {
            SyncAction::Create | SyncAction::Update => {
                // A later local edit supersedes the queued snapshot.
                let current = db::get_event(&self.pool, &item.event_id).await?;
                let event = match current {
                    Some(current) if current.updated_at > item.payload.updated_at => current,
                    _ => item.payload.clone(),
                };
                self.push_remote(&event).await?;
                Ok(Some(event.updated_at))
            }
            SyncAction::Delete => {
                self.remote.delete_event(&item.event_id).await?;
                Ok(None)
            }
        }
    }

    /// Work through the queue in order. Each item gets one attempt.
    #[instrument(skip_all)]
    pub async fn drain(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        let items = db::queue_items(&self.pool).await?;
        if items.is_empty() {
            return Ok(report);
        }
        if !self.is_online().await {
            report.offline = true;
            report.remaining = items.len();
            return Ok(report);
        }

        for item in &items {
            let pushes = item.action != SyncAction::Delete;
            match self.process_item(item).await {
                Ok(pushed_at) => {
                    db::remove_queue_item(&self.pool, item.id).await?;
                    if let Some(at) = pushed_at {
                        self.mark(&item.event_id, SyncStatus::Synced, Some(at)).await?;
                    }
                    debug!(id = item.id, event_id = %item.event_id, action = item.action.as_str(), "queue item done");
                    report.succeeded += 1;
                }
                Err(Error::Remote(err)) => {
                    // Only a failed ping means the connection is gone; an
                    // item that times out on its own still spends a retry.
                    if matches!(err, RemoteError::Unreachable(_)) && !self.is_online().await {
                        warn!(id = item.id, %err, "remote became unreachable; stopping drain");
                        report.offline = true;
                        break;
                    }
                    report.failed += 1;
                    if pushes {
                        self.mark(&item.event_id, SyncStatus::Failed, None).await?;
                    }
                    let retries = item.retry_count + 1;
                    if retries >= self.settings.max_retries {
                        error!(
                            id = item.id,
                            event_id = %item.event_id,
                            action = item.action.as_str(),
                            retries,
                            %err,
                            "queue item abandoned after max retries"
                        );
                        db::remove_queue_item(&self.pool, item.id).await?;
                        report.abandoned += 1;
                    } else {
                        warn!(id = item.id, event_id = %item.event_id, retries, %err, "queue item failed; requeued");
                        db::set_queue_retry(&self.pool, item.id, retries).await?;
                    }
                    // `failed` never sticks: an abandoned event stays pending
                    // until a later edit or force sync pushes it.
                    if pushes {
                        self.mark(&item.event_id, SyncStatus::Pending, None).await?;
                    }
                }
                Err(err) => return Err(err),
            }
        }
        report.remaining = db::queue_len(&self.pool).await? as usize;
        Ok(report)
    }

    /// Merge remote changes since the last pull into the local store.
    #[instrument(skip_all)]
    pub async fn pull(&self) -> Result<PullReport> {
        let mut report = PullReport::default();
        if !self.is_online().await {
            report.offline = true;
            return Ok(report);
        }

        let cutoff = self.clock.now() - self.settings.tombstone_ttl;
        let purged = db::purge_tombstones(&self.pool, cutoff).await?;
        if purged > 0 {
            debug!(purged, "expired tombstones purged");
        }

        let since = db::last_sync_timestamp(&self.pool).await?;
        let remote_events = match self.remote.events_updated_since(since).await {
            Ok(events) => events,
            Err(err) => {
                warn!(%err, "pull failed");
                report.offline = matches!(err, RemoteError::Unreachable(_));
                return Ok(report);
            }
        };

        let mut events = db::load_events(&self.pool).await?;
        let mut index: HashMap<String, usize> = events
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
        let mut newest = since;

        for remote in remote_events {
            newest = newest.max(remote.updated_at);
            if let Err(err) = remote.clone().into_local(&self.settings.api_endpoint).validate() {
                warn!(event_id = %remote.id, %err, "rejecting invalid remote record");
                report.rejected += 1;
                continue;
            }
            if let Some(stone) = db::tombstone(&self.pool, &remote.id).await? {
                if remote.updated_at <= stone.deleted_at {
                    debug!(event_id = %remote.id, "skipping remote copy of deleted event");
                    report.tombstoned += 1;
                    continue;
                }
                // Edited remotely after our delete: the remote copy wins.
                db::remove_tombstone(&self.pool, &remote.id).await?;
            }
            let existing = index.get(&remote.id).copied();
            match existing {
                None => {
                    index.insert(remote.id.clone(), events.len());
                    events.push(remote.into_local(&self.settings.api_endpoint));
                    report.inserted += 1;
                }
                Some(i) if remote.updated_at > events[i].updated_at => {
                    remote.apply_to(&mut events[i]);
                    report.updated += 1;
                }
                Some(_) => report.unchanged += 1,
            }
        }

        if report.changed() {
            db::save_events(&self.pool, &events).await?;
            info!(
                inserted = report.inserted,
                updated = report.updated,
                "pulled remote changes"
            );
        }
        if newest > since {
            db::set_last_sync(&self.pool, newest, report.changed()).await?;
        }
        Ok(report)
    }

    pub async fn sync_once(&self) -> Result<SyncReport> {
        let drain = self.drain().await?;
        let pull = self.pull().await?;
        Ok(SyncReport {
            pushed: 0,
            drain,
            pull,
        })
    }

    /// Push every local event regardless of status, then drain and pull.
    #[instrument(skip_all)]
    pub async fn force_sync(&self) -> Result<SyncReport> {
        let mut pushed = 0;
        for event in db::load_events(&self.pool).await? {
            match self.push_event(&event).await? {
                PushOutcome::Synced => pushed += 1,
                PushOutcome::Failed(_) => {
                    db::enqueue(&self.pool, &event, SyncAction::Update, self.clock.now()).await?;
                    self.mark(&event.id, SyncStatus::Pending, None).await?;
                }
                PushOutcome::Offline => break,
            }
        }
        let mut report = self.sync_once().await?;
        report.pushed = pushed;
        Ok(report)
    }

    /// Sync forever: every `interval` while online, backing off while the
    /// remote is unreachable or a round fails.
    pub async fn run(self: Arc<Self>) {
        let mut backoff = Backoff::new(self.settings.interval, self.settings.max_backoff);
        loop {
            let delay = match self.sync_once().await {
                Ok(report) if report.online() => {
                    backoff.reset();
                    self.settings.interval
                }
                Ok(_) => {
                    let delay = backoff.next_delay();
                    debug!(?delay, "remote offline; backing off");
                    delay
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    error!(?err, ?delay, "sync round failed");
                    delay
                }
            };
            tokio::time::sleep(delay).await;
        }
    }
}
