//! Local record store backed by SQLite.
//!
//! Submodules:
//! - `repo`: the events collection and the active-event pointer.
//! - `queue`: the durable sync queue.
//! - `meta`: pull cursor, sync counter and deletion tombstones.
//! - `model`: small view models returned by `meta`.
//!
//! Everything is re-exported at `crate::db::*`. The store assumes exactly one
//! live process per data directory; the pool holds a single connection so
//! every operation is serialized.

pub mod meta;
pub mod model;
pub mod queue;
pub mod repo;

pub use meta::*;
pub use model::{SyncMeta, Tombstone};
pub use queue::*;
pub use repo::*;

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let in_memory = normalized.starts_with("sqlite::memory");
    let mut options = SqliteConnectOptions::from_str(&normalized)?.create_if_missing(true);
    if !in_memory {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Expand a leading `~/` in file-backed SQLite URLs and make sure the parent
/// directory exists. In-memory URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{expanded_path}");
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Fresh in-memory store with migrations applied.
pub async fn memory_pool() -> Result<Pool> {
    let pool = init_pool("sqlite::memory:").await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_urls_pass_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
    }

    #[test]
    fn file_urls_are_normalized_and_parent_created() {
        let td = tempfile::tempdir().unwrap();
        let db_path = td.path().join("nested").join("gallery.db");
        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let normalized = prepare_sqlite_url(&url);
        assert_eq!(normalized, format!("sqlite://{}?mode=rwc", db_path.display()));
        assert!(td.path().join("nested").exists());
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let td = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/gallery.db", td.path().display());
        {
            let pool = init_pool(&url).await.unwrap();
            run_migrations(&pool).await.unwrap();
            set_last_sync(&pool, chrono::Utc::now(), true).await.unwrap();
            pool.close().await;
        }
        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        assert_eq!(sync_meta(&pool).await.unwrap().sync_count, 1);
    }
}
