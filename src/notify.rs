//! Fire-and-forget notifications about ingested photos.
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Start,
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub kind: NotificationKind,
    /// Correlates the start notification with its outcome.
    pub upload_id: String,
    pub file_name: String,
    pub event_id: Option<String>,
    pub photo_id: Option<String>,
    pub message: String,
}

/// Delivery is best effort: implementations must not block and must
/// swallow their own errors.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log only.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: Notification) {
        info!(
            kind = ?n.kind,
            upload_id = %n.upload_id,
            file = %n.file_name,
            event_id = n.event_id.as_deref().unwrap_or("-"),
            photo_id = n.photo_id.as_deref().unwrap_or("-"),
            "{}",
            n.message
        );
    }
}

/// Posts each notification as JSON to a webhook on a detached task.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, notification: Notification) {
        LogNotifier.notify(notification.clone());
        let http = self.http.clone();
        let url = self.url.clone();
        // Needs a running runtime; outside one the notification is only logged.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        handle.spawn(async move {
            match http.post(&url).json(&notification).send().await {
                Ok(res) if res.status().is_success() => {}
                Ok(res) => debug!(status = %res.status(), "notification webhook rejected"),
                Err(err) => debug!(?err, "notification webhook unreachable"),
            }
        });
    }
}
