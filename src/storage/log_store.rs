use super::naming::{day_of, file_name};
use super::traits::{LogTarget, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// The single writable log file.
struct ActiveFile {
    path: PathBuf,
    created: NaiveDate,
    file: File,
}

impl ActiveFile {
    fn open(dir: &Path, now: DateTime<Utc>) -> Result<Self, StorageError> {
        let created = day_of(now);
        let path = dir.join(file_name(created));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StorageError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            created,
            file,
        })
    }

    /// A file created on day D expires at the start of day D+1.
    fn expired(&self, now: DateTime<Utc>) -> bool {
        let created = self.created.and_time(chrono::NaiveTime::MIN).and_utc();
        now - created >= TimeDelta::hours(24)
    }

    fn close(mut self) -> Result<(), StorageError> {
        self.file
            .flush()
            .and_then(|_| self.file.sync_all())
            .map_err(|source| StorageError::Close {
                path: self.path.clone(),
                source,
            })
    }
}

/// Daily-rotated append-only file store.
///
/// Every mutation of the active file (append, rotate, close) goes through one
/// lock. Filesystems only promise atomic appends up to some size and batches
/// are unbounded, so concurrent writers must not reach the file directly.
pub struct LogStore {
    dir: PathBuf,
    active: Arc<Mutex<Option<ActiveFile>>>,
}

impl LogStore {
    /// Open (or continue) the file for the current day in `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        Self::open_at(dir, Utc::now())
    }

    pub fn open_at<P: AsRef<Path>>(dir: P, now: DateTime<Utc>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        let active = ActiveFile::open(&dir, now)?;
        tracing::info!(path = %active.path.display(), "Opened log file");

        Ok(Self {
            dir,
            active: Arc::new(Mutex::new(Some(active))),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Join a batch into one buffer, adding a terminator to lines that lack one.
fn encode_batch(lines: &[String]) -> Vec<u8> {
    let len = lines.iter().map(|l| l.len() + 1).sum();
    let mut buf = Vec::with_capacity(len);
    for line in lines {
        buf.extend_from_slice(line.as_bytes());
        if !line.ends_with('\n') {
            buf.push(b'\n');
        }
    }
    buf
}

fn write_blocking(active: &Mutex<Option<ActiveFile>>, buf: &[u8]) -> Result<(), StorageError> {
    let mut guard = active.lock().map_err(|_| StorageError::LockPoisoned)?;
    let file = guard.as_mut().ok_or(StorageError::Closed)?;
    file.file
        .write_all(buf)
        .map_err(|source| StorageError::Write {
            path: file.path.clone(),
            source,
        })
}

fn rotate_blocking(
    active: &Mutex<Option<ActiveFile>>,
    dir: &Path,
    now: DateTime<Utc>,
) -> Result<bool, StorageError> {
    let mut guard = active.lock().map_err(|_| StorageError::LockPoisoned)?;
    let current = guard.as_ref().ok_or(StorageError::Closed)?;
    if !current.expired(now) {
        tracing::debug!(path = %current.path.display(), "Log file is current, not rotating");
        return Ok(false);
    }

    // Open the replacement first so a failure leaves the old file writable.
    let next = ActiveFile::open(dir, now)?;
    let previous = guard.replace(next);
    if let Some(previous) = previous {
        let path = previous.path.clone();
        // The new file is already active, so a failed close is not a failed rotation.
        match previous.close() {
            Ok(()) => tracing::info!(previous = %path.display(), "Rotated out log file"),
            Err(e) => tracing::error!(
                previous = %path.display(),
                error = %e,
                "Failed to close rotated-out log file"
            ),
        }
    }
    if let Some(current) = guard.as_ref() {
        tracing::info!(path = %current.path.display(), "Writing to log file");
    }
    Ok(true)
}

fn close_blocking(active: &Mutex<Option<ActiveFile>>) -> Result<(), StorageError> {
    let mut guard = active.lock().map_err(|_| StorageError::LockPoisoned)?;
    match guard.take() {
        Some(file) => {
            let path = file.path.clone();
            file.close()?;
            tracing::info!(path = %path.display(), "Closed log file");
            Ok(())
        }
        None => Ok(()),
    }
}

#[async_trait]
impl LogTarget for LogStore {
    fn active_path(&self) -> Result<PathBuf, StorageError> {
        let guard = self.active.lock().map_err(|_| StorageError::LockPoisoned)?;
        guard
            .as_ref()
            .map(|f| f.path.clone())
            .ok_or(StorageError::Closed)
    }

    async fn append(&self, lines: &[String]) -> Result<(), StorageError> {
        if lines.is_empty() {
            return Ok(());
        }

        // Built before taking the lock; the lock only covers the write itself.
        let buf = encode_batch(lines);
        let active = self.active.clone();

        tokio::task::spawn_blocking(move || write_blocking(&active, &buf))
            .await
            .map_err(|e| StorageError::Join(e.to_string()))?
    }

    async fn rotate(&self, now: DateTime<Utc>) -> Result<bool, StorageError> {
        let active = self.active.clone();
        let dir = self.dir.clone();

        tokio::task::spawn_blocking(move || rotate_blocking(&active, &dir, now))
            .await
            .map_err(|e| StorageError::Join(e.to_string()))?
    }

    async fn close(&self) -> Result<(), StorageError> {
        let active = self.active.clone();

        tokio::task::spawn_blocking(move || close_blocking(&active))
            .await
            .map_err(|e| StorageError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_encode_batch_adds_missing_terminators() {
        let buf = encode_batch(&lines(&["a", "b\n", "c"]));
        assert_eq!(buf, b"a\nb\nc\n");
    }

    #[tokio::test]
    async fn test_append_preserves_batch_order() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open_at(dir.path(), at(2024, 1, 3, 10)).unwrap();

        store.append(&lines(&["a", "b"])).await.unwrap();
        store.append(&lines(&["c"])).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join("20240103.log")).unwrap();
        assert_eq!(content, "a\nb\nc\n");
    }

    #[tokio::test]
    async fn test_open_continues_existing_day_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("20240103.log"), "before\n").unwrap();

        let store = LogStore::open_at(dir.path(), at(2024, 1, 3, 18)).unwrap();
        store.append(&lines(&["after"])).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join("20240103.log")).unwrap();
        assert_eq!(content, "before\nafter\n");
    }

    #[tokio::test]
    async fn test_rotate_is_noop_within_same_day() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open_at(dir.path(), at(2024, 1, 3, 0)).unwrap();

        assert!(!store.rotate(at(2024, 1, 3, 23)).await.unwrap());
        assert_eq!(
            store.active_path().unwrap(),
            dir.path().join("20240103.log")
        );
    }

    #[tokio::test]
    async fn test_rotate_after_day_boundary_creates_new_file() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open_at(dir.path(), at(2024, 1, 3, 15)).unwrap();
        store.append(&lines(&["day one"])).await.unwrap();

        assert!(store.rotate(at(2024, 1, 4, 0)).await.unwrap());
        store.append(&lines(&["day two"])).await.unwrap();

        // Second rotate on the same day does nothing.
        assert!(!store.rotate(at(2024, 1, 4, 12)).await.unwrap());

        let old = std::fs::read_to_string(dir.path().join("20240103.log")).unwrap();
        let new = std::fs::read_to_string(dir.path().join("20240104.log")).unwrap();
        assert_eq!(old, "day one\n");
        assert_eq!(new, "day two\n");
    }

    #[tokio::test]
    async fn test_rotate_skipping_days_names_file_after_current_day() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open_at(dir.path(), at(2024, 1, 3, 15)).unwrap();

        assert!(store.rotate(at(2024, 1, 9, 7)).await.unwrap());
        assert_eq!(
            store.active_path().unwrap(),
            dir.path().join("20240109.log")
        );
    }

    // fsync on /dev/null fails with EINVAL on Linux.
    #[cfg(target_os = "linux")]
    #[test]
    fn test_rotate_succeeds_when_closing_old_file_fails() {
        let dir = TempDir::new().unwrap();
        let file = OpenOptions::new().append(true).open("/dev/null").unwrap();
        let active = Mutex::new(Some(ActiveFile {
            path: PathBuf::from("/dev/null"),
            created: at(2024, 1, 3, 0).date_naive(),
            file,
        }));

        assert!(rotate_blocking(&active, dir.path(), at(2024, 1, 4, 0)).unwrap());

        let expected = dir.path().join("20240104.log");
        let guard = active.lock().unwrap();
        assert_eq!(guard.as_ref().map(|f| f.path.clone()), Some(expected.clone()));
        drop(guard);

        write_blocking(&active, b"after\n").unwrap();
        assert_eq!(std::fs::read_to_string(expected).unwrap(), "after\n");
    }

    #[tokio::test]
    async fn test_closed_store_refuses_writes() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open_at(dir.path(), at(2024, 1, 3, 10)).unwrap();
        store.append(&lines(&["kept"])).await.unwrap();

        store.close().await.unwrap();
        // Closing twice is harmless.
        store.close().await.unwrap();

        assert!(matches!(
            store.append(&lines(&["lost"])).await,
            Err(StorageError::Closed)
        ));
        assert!(matches!(
            store.rotate(at(2024, 1, 5, 0)).await,
            Err(StorageError::Closed)
        ));
        assert!(matches!(store.active_path(), Err(StorageError::Closed)));

        let content = std::fs::read_to_string(dir.path().join("20240103.log")).unwrap();
        assert_eq!(content, "kept\n");
    }

    #[tokio::test]
    async fn test_concurrent_batches_are_not_interleaved() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LogStore::open_at(dir.path(), at(2024, 1, 3, 10)).unwrap());

        let mut handles = Vec::new();
        for writer in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let batch: Vec<String> = (0..50).map(|i| format!("w{writer}-{i}")).collect();
                store.append(&batch).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let content = std::fs::read_to_string(dir.path().join("20240103.log")).unwrap();
        let written: Vec<&str> = content.lines().collect();
        assert_eq!(written.len(), 400);

        // Each batch appears as one contiguous, ordered run.
        for chunk in written.chunks(50) {
            let writer = chunk[0].split('-').next().unwrap();
            for (i, line) in chunk.iter().enumerate() {
                assert_eq!(*line, format!("{writer}-{i}"));
            }
        }
    }

    #[test]
    fn test_open_fails_for_missing_dir() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            LogStore::open(&missing),
            Err(StorageError::Open { .. })
        ));
    }
}
