use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Something the ingest path appends log lines to.
///
/// Implementations serialize writers internally; callers may share one
/// target across any number of concurrent requests.
#[async_trait]
pub trait LogTarget: Send + Sync {
    /// Path of the file currently receiving writes.
    fn active_path(&self) -> Result<PathBuf, StorageError>;

    /// Append a batch as one write, terminating every line with `\n`.
    async fn append(&self, lines: &[String]) -> Result<(), StorageError>;

    /// Swap in a new active file when the current one is at least a day old.
    /// Returns whether a rotation happened.
    async fn rotate(&self, now: DateTime<Utc>) -> Result<bool, StorageError>;

    /// Flush and close the active file. Later appends fail with
    /// [`StorageError::Closed`].
    async fn close(&self) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to open log file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write log file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to close log file {}: {source}", .path.display())]
    Close {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("log store is closed")]
    Closed,

    #[error("log store lock poisoned")]
    LockPoisoned,

    #[error("task join error: {0}")]
    Join(String),
}
