//! Error types shared by the store, the sync engine and the ingestion pipeline.
use thiserror::Error;

/// Failure talking to the remote gallery service.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote unreachable: {0}")]
    Unreachable(String),
    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid remote response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether retrying the same request later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Unreachable(_) => true,
            RemoteError::Status { status, .. } => *status == 429 || *status >= 500,
            RemoteError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            RemoteError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            RemoteError::Unreachable(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("invalid record: {0}")]
    Validation(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("event not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(RemoteError::Unreachable("refused".into()).is_transient());
        assert!(RemoteError::Status { status: 503, body: String::new() }.is_transient());
        assert!(RemoteError::Status { status: 429, body: String::new() }.is_transient());
        assert!(!RemoteError::Status { status: 400, body: String::new() }.is_transient());
        assert!(!RemoteError::Decode("bad json".into()).is_transient());
    }
}
