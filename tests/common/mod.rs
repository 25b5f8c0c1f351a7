#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use gallery_sync::catalog::{Catalog, CatalogSettings};
use gallery_sync::clock::Clock;
use gallery_sync::db::Pool;
use gallery_sync::error::RemoteError;
use gallery_sync::notify::{Notification, Notifier};
use gallery_sync::remote::{PhotoUpload, RemoteEvent, RemoteStore};
use gallery_sync::sync::{SyncEngine, SyncSettings};

pub fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

pub fn timed_out() -> RemoteError {
    RemoteError::Unreachable("operation timed out".into())
}

pub fn unavailable() -> RemoteError {
    RemoteError::Status {
        status: 503,
        body: "unavailable".into(),
    }
}

#[derive(Default)]
struct FakeState {
    online: bool,
    events: HashMap<String, RemoteEvent>,
    write_failures: VecDeque<RemoteError>,
    upload_failures: VecDeque<RemoteError>,
    disconnect_on_write: bool,
    calls: Vec<String>,
    uploads: Vec<(String, String)>,
    uploaded_bytes: Vec<Vec<u8>>,
}

/// In-memory gallery service. Clones share state, so two local stores can
/// sync against the same remote.
#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRemote {
    pub fn online() -> Self {
        let remote = Self::default();
        remote.set_online(true);
        remote
    }

    pub fn offline() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        self.state.lock().unwrap().online = online;
    }

    /// The next create/update/delete calls fail with these errors, in order.
    pub fn fail_writes(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.state.lock().unwrap().write_failures.extend(errors);
    }

    /// The next write takes the whole remote offline and fails.
    pub fn disconnect_on_next_write(&self) {
        self.state.lock().unwrap().disconnect_on_write = true;
    }

    pub fn fail_uploads(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.state.lock().unwrap().upload_failures.extend(errors);
    }

    pub fn put(&self, event: RemoteEvent) {
        self.state
            .lock()
            .unwrap()
            .events
            .insert(event.id.clone(), event);
    }

    pub fn get(&self, id: &str) -> Option<RemoteEvent> {
        self.state.lock().unwrap().events.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().events.len()
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().events.clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == name).count()
    }

    /// `(event_id, file_name)` of every accepted upload.
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().uploads.clone()
    }

    /// Bytes of every accepted upload, in order.
    pub fn uploaded_bytes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().uploaded_bytes.clone()
    }

    fn enter(&self, call: &str) -> Result<std::sync::MutexGuard<'_, FakeState>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.to_string());
        if !state.online {
            return Err(RemoteError::Unreachable("connection refused".into()));
        }
        Ok(state)
    }

    fn write(&self, call: &str) -> Result<std::sync::MutexGuard<'_, FakeState>, RemoteError> {
        let mut state = self.enter(call)?;
        if state.disconnect_on_write {
            state.disconnect_on_write = false;
            state.online = false;
            return Err(RemoteError::Unreachable("connection reset".into()));
        }
        if let Some(err) = state.write_failures.pop_front() {
            return Err(err);
        }
        Ok(state)
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn ping(&self) -> Result<(), RemoteError> {
        self.enter("ping").map(|_| ())
    }

    async fn fetch_event(&self, id: &str) -> Result<Option<RemoteEvent>, RemoteError> {
        let state = self.enter("fetch")?;
        Ok(state.events.get(id).cloned())
    }

    async fn create_event(&self, event: &RemoteEvent) -> Result<(), RemoteError> {
        let mut state = self.write("create")?;
        state.events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn update_event(&self, event: &RemoteEvent) -> Result<(), RemoteError> {
        let mut state = self.write("update")?;
        state.events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn delete_event(&self, id: &str) -> Result<(), RemoteError> {
        let mut state = self.write("delete")?;
        state.events.remove(id);
        Ok(())
    }

    async fn events_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteEvent>, RemoteError> {
        let state = self.enter("list")?;
        let mut events: Vec<RemoteEvent> = state
            .events
            .values()
            .filter(|e| e.updated_at >= since)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.updated_at);
        Ok(events)
    }

    async fn upload_photo(
        &self,
        event_id: &str,
        photo: PhotoUpload,
    ) -> Result<String, RemoteError> {
        let mut state = self.enter("upload")?;
        if let Some(err) = state.upload_failures.pop_front() {
            return Err(err);
        }
        state
            .uploads
            .push((event_id.to_string(), photo.file_name.clone()));
        state.uploaded_bytes.push(photo.bytes);
        Ok(format!("photo-{}", state.uploads.len()))
    }
}

/// Clock that only moves when told to.
pub struct StepClock {
    now: Mutex<DateTime<Utc>>,
}

impl StepClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

pub fn catalog_settings() -> CatalogSettings {
    CatalogSettings {
        share_base_url: "https://gallery.example.com".into(),
        qr_service_url: "https://api.qrserver.com/v1/create-qr-code/".into(),
        api_endpoint: "https://gallery.example.com/".into(),
    }
}

/// A local store wired to `remote` with its own clock.
pub struct Node {
    pub pool: Pool,
    pub clock: Arc<StepClock>,
    pub catalog: Catalog,
    pub engine: SyncEngine,
}

pub async fn node(remote: &FakeRemote, start: DateTime<Utc>) -> Node {
    let pool = gallery_sync::db::memory_pool().await.unwrap();
    let clock = StepClock::new(start);
    let catalog = Catalog::new(pool.clone(), clock.clone(), catalog_settings());
    let engine = SyncEngine::new(
        pool.clone(),
        Arc::new(remote.clone()),
        clock.clone(),
        SyncSettings {
            api_endpoint: "https://gallery.example.com/".into(),
            ..SyncSettings::default()
        },
    );
    Node {
        pool,
        clock,
        catalog,
        engine,
    }
}
