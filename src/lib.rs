pub mod backoff;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod model;
pub mod notify;
pub mod remote;
pub mod sync;
pub mod transform;
pub mod watcher;

pub use error::{Error, Result};
