//! SQLite persistence behind the `tournament` storage traits.

pub mod sqlite;

pub use sqlite::{Database, EngineDetail, SqliteStore};

/// Errors from opening and migrating the database.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(String),
}

/// Current unix timestamp in seconds.
pub(crate) fn now_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
