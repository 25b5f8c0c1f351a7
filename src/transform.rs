//! Pluggable photo transform (compression, watermarking) applied before
//! upload. The pipeline asks at runtime whether one is available.
use crate::model::Event;

pub trait PhotoTransform: Send + Sync {
    /// Whether this transform can run in the current environment.
    fn is_available(&self) -> bool;

    fn apply(&self, event: &Event, file_name: &str, bytes: Vec<u8>) -> anyhow::Result<Vec<u8>>;
}

/// Uploads the original bytes unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransform;

impl PhotoTransform for NoTransform {
    fn is_available(&self) -> bool {
        false
    }

    fn apply(&self, _event: &Event, _file_name: &str, bytes: Vec<u8>) -> anyhow::Result<Vec<u8>> {
        Ok(bytes)
    }
}
