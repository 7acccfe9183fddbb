use super::naming::{day_of, is_log_file_name, parse_file_date};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("failed to read log directory {}: {source}", .path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("log file {} does not carry a YYYYMMDD date", .path.display())]
    InvalidFileName { path: PathBuf },

    #[error("failed to delete {}: {source}", .path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("retention horizon {0:?} is out of range")]
    InvalidHorizon(Duration),
}

/// Outcome of one retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionStats {
    pub scanned: usize,
    /// Deleted files, oldest first.
    pub deleted: Vec<PathBuf>,
}

/// Deletes dated log files that have aged past the retention horizon.
#[derive(Debug, Clone)]
pub struct RetentionManager {
    dir: PathBuf,
    horizon: Duration,
}

impl RetentionManager {
    pub fn new<P: AsRef<Path>>(dir: P, horizon: Duration) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            horizon,
        }
    }

    pub fn from_days<P: AsRef<Path>>(dir: P, days: u32) -> Self {
        Self::new(dir, Duration::from_secs(u64::from(days) * 86_400))
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    /// Last day whose file is eligible for deletion at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Result<NaiveDate, RetentionError> {
        let horizon = TimeDelta::from_std(self.horizon)
            .map_err(|_| RetentionError::InvalidHorizon(self.horizon))?;
        let cutoff = now
            .checked_sub_signed(horizon)
            .ok_or(RetentionError::InvalidHorizon(self.horizon))?;
        Ok(day_of(cutoff))
    }

    /// Delete files oldest-first until the first one inside the horizon.
    ///
    /// Any unparseable name aborts the pass before anything is deleted, and a
    /// failed delete aborts the rest of the pass. Either way the next scheduled
    /// pass starts over.
    pub fn run(&self, now: DateTime<Utc>) -> Result<RetentionStats, RetentionError> {
        let cutoff = self.cutoff(now)?;
        let files = self.dated_files()?;

        tracing::debug!(
            dir = %self.dir.display(),
            files = files.len(),
            cutoff = %cutoff,
            "Checking log retention"
        );

        let mut stats = RetentionStats {
            scanned: files.len(),
            deleted: Vec::new(),
        };

        for (date, path) in files {
            if date > cutoff {
                break;
            }

            tracing::info!(path = %path.display(), "Deleting expired log file");
            std::fs::remove_file(&path).map_err(|source| RetentionError::Delete {
                path: path.clone(),
                source,
            })?;
            stats.deleted.push(path);
        }

        Ok(stats)
    }

    /// Log files in the directory, sorted ascending by their embedded date.
    fn dated_files(&self) -> Result<Vec<(NaiveDate, PathBuf)>, RetentionError> {
        let read_dir_err = |source| RetentionError::ReadDir {
            path: self.dir.clone(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(read_dir_err)? {
            let entry = entry.map_err(read_dir_err)?;
            let path = entry.path();
            let is_file = entry.file_type().map_err(read_dir_err)?.is_file();
            if !is_file || !is_log_file_name(&path) {
                continue;
            }

            let date = parse_file_date(&path)
                .ok_or_else(|| RetentionError::InvalidFileName { path: path.clone() })?;
            files.push((date, path));
        }

        files.sort();
        Ok(files)
    }
}
