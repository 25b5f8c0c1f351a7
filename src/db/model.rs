//! View models returned by the metadata repository.

use chrono::{DateTime, Utc};

/// Pull cursor and diagnostic counter.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncMeta {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_count: i64,
}

/// Marker left behind by a local delete so stale remote copies are not
/// pulled back in.
#[derive(Debug, Clone, PartialEq)]
pub struct Tombstone {
    pub event_id: String,
    pub deleted_at: DateTime<Utc>,
}
