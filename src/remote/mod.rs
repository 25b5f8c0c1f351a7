use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::RemoteError;

pub mod model;

pub use model::{PhotoUpload, RemoteEvent};
use model::UploadPhotoResponse;

/// The remote gallery service, as seen by the sync engine and the
/// ingestion pipeline.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Cheap read used as the online/offline signal.
    async fn ping(&self) -> Result<(), RemoteError>;

    async fn fetch_event(&self, id: &str) -> Result<Option<RemoteEvent>, RemoteError>;

    async fn create_event(&self, event: &RemoteEvent) -> Result<(), RemoteError>;

    async fn update_event(&self, event: &RemoteEvent) -> Result<(), RemoteError>;

    /// Deleting an event the remote does not know is a success.
    async fn delete_event(&self, id: &str) -> Result<(), RemoteError>;

    /// Events with `updated_at >= since`, oldest first.
    async fn events_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteEvent>, RemoteError>;

    /// Upload a photo into an event's gallery; returns the remote photo id.
    async fn upload_photo(&self, event_id: &str, photo: PhotoUpload)
        -> Result<String, RemoteError>;
}

#[derive(Clone)]
pub struct HttpRemote {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl fmt::Debug for HttpRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|err| RemoteError::Decode(format!("invalid base url {base_url}: {err}")))?;
        let http = Client::builder()
            .user_agent(concat!("gallery-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, RemoteError> {
        Self::new(
            &cfg.remote.base_url,
            Some(cfg.remote.api_key.clone()),
            Duration::from_secs(cfg.remote.timeout_seconds),
        )
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|err| RemoteError::Decode(format!("invalid endpoint {path}: {err}")))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, RemoteError> {
        let res = self.authorize(req).send().await?;
        debug!(status = %res.status(), url = %res.url(), "remote response");
        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by gallery service: {}", body);
            return Err(RemoteError::Status { status: 429, body });
        }
        Ok(res)
    }

    async fn expect_success(res: Response) -> Result<Response, RemoteError> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Err(RemoteError::Status { status, body })
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn ping(&self) -> Result<(), RemoteError> {
        let res = self.send(self.http.get(self.endpoint("api/health")?)).await?;
        Self::expect_success(res).await?;
        Ok(())
    }

    async fn fetch_event(&self, id: &str) -> Result<Option<RemoteEvent>, RemoteError> {
        let url = self.endpoint(&format!("api/events/{id}"))?;
        let res = self.send(self.http.get(url)).await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let res = Self::expect_success(res).await?;
        Ok(Some(res.json::<RemoteEvent>().await?))
    }

    async fn create_event(&self, event: &RemoteEvent) -> Result<(), RemoteError> {
        let url = self.endpoint("api/events")?;
        let res = self.send(self.http.post(url).json(event)).await?;
        Self::expect_success(res).await?;
        Ok(())
    }

    async fn update_event(&self, event: &RemoteEvent) -> Result<(), RemoteError> {
        let url = self.endpoint(&format!("api/events/{}", event.id))?;
        let res = self.send(self.http.put(url).json(event)).await?;
        Self::expect_success(res).await?;
        Ok(())
    }

    async fn delete_event(&self, id: &str) -> Result<(), RemoteError> {
        let url = self.endpoint(&format!("api/events/{id}"))?;
        let res = self.send(self.http.delete(url)).await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::expect_success(res).await?;
        Ok(())
    }

    async fn events_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteEvent>, RemoteError> {
        let url = self.endpoint("api/events")?;
        let since = since.to_rfc3339_opts(SecondsFormat::Millis, true);
        let req = self
            .http
            .get(url)
            .query(&[("updated_since", since.as_str()), ("order", "asc")]);
        let res = Self::expect_success(self.send(req).await?).await?;
        let values = res.json::<Vec<serde_json::Value>>().await?;
        Ok(decode_events(values))
    }

    async fn upload_photo(
        &self,
        event_id: &str,
        photo: PhotoUpload,
    ) -> Result<String, RemoteError> {
        let url = self.endpoint(&format!("api/events/{event_id}/photos"))?;
        let content_type = content_type(Path::new(&photo.file_name));
        let part = reqwest::multipart::Part::bytes(photo.bytes)
            .file_name(photo.file_name)
            .mime_str(content_type)?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("uploader_name", photo.uploader_name)
            .text("album_name", photo.album_name);
        let res = Self::expect_success(self.send(self.http.post(url).multipart(form)).await?).await?;
        let body = res.json::<UploadPhotoResponse>().await?;
        Ok(body.id)
    }
}

/// Decode a changes feed element by element; malformed entries are logged
/// and dropped so one bad record cannot stall the pull. Oldest first.
fn decode_events(values: Vec<serde_json::Value>) -> Vec<RemoteEvent> {
    let mut events: Vec<RemoteEvent> = values
        .into_iter()
        .filter_map(|value| {
            let id = value.get("id").and_then(|v| v.as_str()).unwrap_or("?").to_string();
            match serde_json::from_value::<RemoteEvent>(value) {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!(event_id = %id, %err, "skipping undecodable remote event");
                    None
                }
            }
        })
        .collect();
    events.sort_by_key(|e| e.updated_at);
    events
}

fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        Some("webp") => "image/webp",
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let remote = HttpRemote::new("https://gallery.example.com/v2", None, Duration::from_secs(5))
            .unwrap();
        assert_eq!(
            remote.endpoint("api/events/abc").unwrap().as_str(),
            "https://gallery.example.com/v2/api/events/abc"
        );
    }

    #[test]
    fn blank_api_key_is_ignored() {
        let remote =
            HttpRemote::new("https://g.example.com", Some("  ".into()), Duration::from_secs(5)).unwrap();
        assert!(remote.api_key.is_none());
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type(Path::new("A.JPG")), "image/jpeg");
        assert_eq!(content_type(Path::new("a.png")), "image/png");
        assert_eq!(content_type(Path::new("a.bin")), "application/octet-stream");
    }

    #[test]
    fn changes_feed_skips_malformed_entries() {
        let values = vec![
            serde_json::json!({
                "id": "late-2025-01-16",
                "name": "Late",
                "date": "2025-01-16",
                "created_at": "2025-01-16T10:00:00Z",
                "updated_at": "2025-01-16T10:00:00Z"
            }),
            serde_json::json!({ "id": "broken", "name": 7 }),
            serde_json::json!({
                "id": "early-2025-01-15",
                "name": "Early",
                "date": "2025-01-15",
                "created_at": "2025-01-15T10:00:00Z",
                "updated_at": "2025-01-15T10:00:00Z"
            }),
        ];
        let events = decode_events(values);
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["early-2025-01-15", "late-2025-01-16"]);
        assert!(events[0].backup_enabled);
    }
}
