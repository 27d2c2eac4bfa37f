//! File-backed record store
//!
//! Each record kind lives in its own JSON file inside the store directory:
//! - `repo.json`: repository list
//! - `users.json`: user list
//!
//! Lists are read and replaced whole. Writes go to a temp file, are synced,
//! then renamed over the target, so readers (and a restarted process) only
//! ever see a complete list.
//!
//! Writes require a [`WriteGuard`]. Only one guard exists at a time per
//! store directory: an in-process mutex covers tasks sharing a
//! [`ConfigStore`], a lock file covers separate processes.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::StoreConfig;
use crate::model::{RepositoryRecord, UserRecord};

const LOCK_FILE: &str = ".store.lock";
const RECLAIM_FILE: &str = ".store.lock.reclaim";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store is busy: another pass holds the write lock")]
    Busy,

    #[error("I/O error on {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("invalid JSON in {path:?}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Record collections held by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Repositories,
    Users,
}

impl RecordKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Repositories => "repo.json",
            Self::Users => "users.json",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repositories => "repositories",
            Self::Users => "users",
        }
    }
}

/// A record type persisted as one list per kind.
pub trait StoredRecord: Serialize + DeserializeOwned + Send + Sync {
    const KIND: RecordKind;
}

impl StoredRecord for RepositoryRecord {
    const KIND: RecordKind = RecordKind::Repositories;
}

impl StoredRecord for UserRecord {
    const KIND: RecordKind = RecordKind::Users;
}

/// Shared handle to the store directory
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    dir: PathBuf,
    stale_lock: Duration,
    writer: Arc<Mutex<()>>,
}

impl ConfigStore {
    /// Open (and create if needed) the store directory.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.dir)
            .await
            .map_err(|e| StoreError::io(&config.dir, e))?;

        Ok(Self {
            inner: Arc::new(StoreInner {
                dir: config.dir.clone(),
                stale_lock: config.stale_lock(),
                writer: Arc::new(Mutex::new(())),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn path_for(&self, kind: RecordKind) -> PathBuf {
        self.inner.dir.join(kind.file_name())
    }

    /// Read the full list for `T`'s kind. A missing file is an empty list.
    pub async fn read<T: StoredRecord>(&self) -> Result<Vec<T>, StoreError> {
        let path = self.path_for(T::KIND);

        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|source| StoreError::Json { path, source })
    }

    pub async fn read_repositories(&self) -> Result<Vec<RepositoryRecord>, StoreError> {
        self.read().await
    }

    pub async fn read_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        self.read().await
    }

    /// Take the single-writer guard without waiting.
    pub async fn try_lock(&self) -> Result<WriteGuard, StoreError> {
        let permit = self
            .inner
            .writer
            .clone()
            .try_lock_owned()
            .map_err(|_| StoreError::Busy)?;

        let lock_path = self.inner.dir.join(LOCK_FILE);
        self.acquire_lock_file(&lock_path).await?;
        tracing::debug!(lock = %lock_path.display(), "store write lock acquired");

        Ok(WriteGuard {
            dir: self.inner.dir.clone(),
            lock_path,
            _permit: permit,
        })
    }

    async fn acquire_lock_file(&self, lock_path: &Path) -> Result<(), StoreError> {
        match create_lock_file(lock_path).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(StoreError::io(lock_path, e)),
        }

        if !self.is_stale(lock_path).await {
            return Err(StoreError::Busy);
        }
        self.reclaim_stale_lock(lock_path).await
    }

    /// Replace an abandoned lock file.
    ///
    /// Only the process holding the reclaim marker may remove the lock, and
    /// it re-checks staleness first: another reclaimer may already have put
    /// a fresh lock in place.
    async fn reclaim_stale_lock(&self, lock_path: &Path) -> Result<(), StoreError> {
        let marker = self.inner.dir.join(RECLAIM_FILE);
        match create_lock_file(&marker).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if self.is_stale(&marker).await {
                    tracing::warn!(
                        marker = %marker.display(),
                        "removing reclaim marker left by a previous process"
                    );
                    remove_if_exists(&marker).await?;
                }
                return Err(StoreError::Busy);
            }
            Err(e) => return Err(StoreError::io(&marker, e)),
        }

        let result = self.replace_lock_file(lock_path).await;
        if let Err(e) = fs::remove_file(&marker).await {
            tracing::warn!(error = %e, marker = %marker.display(), "could not remove reclaim marker");
        }
        result
    }

    async fn replace_lock_file(&self, lock_path: &Path) -> Result<(), StoreError> {
        match fs::metadata(lock_path).await {
            // Released normally in the meantime
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(lock_path, e)),
            Ok(_) => {
                if !self.is_stale(lock_path).await {
                    return Err(StoreError::Busy);
                }
                tracing::warn!(
                    lock = %lock_path.display(),
                    "reclaiming stale store lock left by a previous process"
                );
                remove_if_exists(lock_path).await?;
            }
        }

        match create_lock_file(lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(StoreError::Busy),
            Err(e) => Err(StoreError::io(lock_path, e)),
        }
    }

    async fn is_stale(&self, path: &Path) -> bool {
        let modified = match fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return false,
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > self.inner.stale_lock)
            .unwrap_or(false)
    }

    /// Replace the list for `T`'s kind, taking the guard for the duration.
    pub async fn write<T: StoredRecord>(&self, records: &[T]) -> Result<(), StoreError> {
        let guard = self.try_lock().await?;
        guard.write(records).await
    }
}

async fn create_lock_file(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    let stamp = format!(
        "pid={} at={}\n",
        std::process::id(),
        chrono::Utc::now().to_rfc3339()
    );
    file.write_all(stamp.as_bytes()).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Exclusive write access to the store. Released on drop.
pub struct WriteGuard {
    dir: PathBuf,
    lock_path: PathBuf,
    _permit: OwnedMutexGuard<()>,
}

impl WriteGuard {
    /// Atomically replace the list for `T`'s kind.
    pub async fn write<T: StoredRecord>(&self, records: &[T]) -> Result<(), StoreError> {
        let path = self.dir.join(T::KIND.file_name());
        let tmp_path = self.dir.join(format!("{}.tmp", T::KIND.file_name()));

        let data = serde_json::to_vec_pretty(records).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        {
            let mut file = fs::File::create(&tmp_path)
                .await
                .map_err(|e| StoreError::io(&tmp_path, e))?;
            file.write_all(&data)
                .await
                .map_err(|e| StoreError::io(&tmp_path, e))?;
            file.sync_all()
                .await
                .map_err(|e| StoreError::io(&tmp_path, e))?;
        }

        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::io(&path, e));
        }

        // Persist the rename itself; not supported on every platform.
        if let Ok(dir) = fs::File::open(&self.dir).await {
            let _ = dir.sync_all().await;
        }

        tracing::debug!(
            kind = T::KIND.as_str(),
            records = records.len(),
            path = %path.display(),
            "store list replaced"
        );
        Ok(())
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(&StoreConfig::with_dir(dir.path()))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let (_dir, store) = temp_store().await;
        assert!(store.read_repositories().await.unwrap().is_empty());
        assert!(store.read_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_then_read() {
        let (dir, store) = temp_store().await;
        let mut repo = RepositoryRecord::new("r1", "laptop");
        repo.alert = 3600;
        repo.last_status_alert_send = Some(42);

        store.write(&[repo.clone()]).await.unwrap();

        let read = store.read_repositories().await.unwrap();
        assert_eq!(read, vec![repo]);
        assert!(!dir.path().join("repo.json.tmp").exists());
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn held_guard_makes_writes_busy() {
        let (_dir, store) = temp_store().await;
        let guard = store.try_lock().await.unwrap();

        let err = store.write::<UserRecord>(&[]).await.unwrap_err();
        assert!(matches!(err, StoreError::Busy));
        assert!(matches!(store.try_lock().await, Err(StoreError::Busy)));

        drop(guard);
        store.write::<UserRecord>(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn foreign_lock_file_is_busy() {
        let (dir, store) = temp_store().await;
        std::fs::write(dir.path().join(LOCK_FILE), "pid=1").unwrap();

        assert!(matches!(store.try_lock().await, Err(StoreError::Busy)));
    }

    #[tokio::test]
    async fn stale_lock_file_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::with_dir(dir.path());
        config.stale_lock_secs = 0;
        let store = ConfigStore::open(&config).await.unwrap();
        std::fs::write(dir.path().join(LOCK_FILE), "pid=1").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let guard = store.try_lock().await.unwrap();
        drop(guard);
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    fn age_file(path: &Path, by: Duration) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[tokio::test]
    async fn reclaim_in_progress_elsewhere_is_busy() {
        let (dir, store) = temp_store().await;
        let lock = dir.path().join(LOCK_FILE);
        std::fs::write(&lock, "pid=1").unwrap();
        age_file(&lock, Duration::from_secs(7200));
        std::fs::write(dir.path().join(RECLAIM_FILE), "pid=2").unwrap();

        assert!(matches!(store.try_lock().await, Err(StoreError::Busy)));
        assert_eq!(std::fs::read_to_string(&lock).unwrap(), "pid=1");
        assert!(dir.path().join(RECLAIM_FILE).exists());
    }

    #[tokio::test]
    async fn fresh_lock_is_not_replaced_by_late_reclaimer() {
        let (dir, store) = temp_store().await;
        let lock = dir.path().join(LOCK_FILE);
        // Another process already reclaimed and holds a fresh lock
        std::fs::write(&lock, "pid=3").unwrap();

        assert!(matches!(
            store.replace_lock_file(&lock).await,
            Err(StoreError::Busy)
        ));
        assert_eq!(std::fs::read_to_string(&lock).unwrap(), "pid=3");
    }

    #[tokio::test]
    async fn abandoned_reclaim_marker_is_cleared() {
        let (dir, store) = temp_store().await;
        let lock = dir.path().join(LOCK_FILE);
        let marker = dir.path().join(RECLAIM_FILE);
        std::fs::write(&lock, "pid=1").unwrap();
        std::fs::write(&marker, "pid=2").unwrap();
        age_file(&lock, Duration::from_secs(7200));
        age_file(&marker, Duration::from_secs(7200));

        assert!(matches!(store.try_lock().await, Err(StoreError::Busy)));
        assert!(!marker.exists());

        drop(store.try_lock().await.unwrap());
        assert!(!lock.exists());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let (dir, store) = temp_store().await;
        std::fs::write(dir.path().join("users.json"), "[{not json").unwrap();

        let err = store.read_users().await.unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }

    #[tokio::test]
    async fn clones_share_the_guard() {
        let (_dir, store) = temp_store().await;
        let other = store.clone();
        let _guard = store.try_lock().await.unwrap();
        assert!(matches!(other.try_lock().await, Err(StoreError::Busy)));
    }
}
