//! Scratch directory on the worker host.
//!
//! Every file the pipeline writes here is registered with a [`ScratchFiles`]
//! tracker, whose `cleanup()` runs after the pipeline body on every exit
//! path. Dropping a tracker that was never cleaned up removes the remaining
//! files synchronously.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::backoff::retry_linear;
use crate::error::{StorageError, StorageResult};

const ONE_GIB: u64 = 1024 * 1024 * 1024;
const DELETE_ATTEMPTS: u32 = 3;

/// Scratch storage configuration.
#[derive(Debug, Clone)]
pub struct ScratchConfig {
    /// Root directory for scratch files
    pub root: PathBuf,
    /// Free space at or below this is reported as insufficient
    pub min_free_bytes: u64,
    /// Unit of the linear backoff between delete attempts
    pub delete_retry_unit: Duration,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/tmp/scribe-scratch"),
            min_free_bytes: ONE_GIB,
            delete_retry_unit: Duration::from_secs(1),
        }
    }
}

impl ScratchConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            root: std::env::var("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.root),
            min_free_bytes: std::env::var("SCRATCH_MIN_FREE_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_free_bytes),
            delete_retry_unit: defaults.delete_retry_unit,
        }
    }
}

/// Handler for the worker's scratch directory.
///
/// Constructed once per process and shared by reference.
#[derive(Debug)]
pub struct ScratchStorage {
    config: ScratchConfig,
}

impl ScratchStorage {
    pub fn new(config: ScratchConfig) -> Self {
        Self { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Path of a scratch file with the given name.
    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.config.root.join(file_name)
    }

    /// Create the root directory if it does not exist.
    pub async fn ensure_initialized(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.config.root).await?;
        debug!(root = %self.config.root.display(), "Scratch storage ready");
        Ok(())
    }

    /// Bytes available to unprivileged users on the scratch filesystem.
    pub fn available_space(&self) -> StorageResult<u64> {
        let stat = nix::sys::statvfs::statvfs(&self.config.root)
            .map_err(|e| StorageError::Io(std::io::Error::from(e)))?;
        Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
    }

    /// Whether there is more free space than the configured minimum.
    pub fn check_space(&self, key: &str) -> bool {
        match self.available_space() {
            Ok(available) if available > self.config.min_free_bytes => true,
            Ok(available) => {
                warn!(
                    key,
                    available,
                    required = self.config.min_free_bytes,
                    "Insufficient scratch space"
                );
                false
            }
            Err(e) => {
                error!(key, "Failed to query scratch space: {}", e);
                false
            }
        }
    }

    /// Like [`check_space`](Self::check_space), as an error.
    pub fn require_space(&self, key: &str) -> StorageResult<()> {
        if self.check_space(key) {
            return Ok(());
        }
        Err(StorageError::InsufficientSpace {
            available: self.available_space().unwrap_or(0),
            required: self.config.min_free_bytes,
        })
    }

    /// Stream `reader` into a new scratch file.
    ///
    /// A partially written file is removed before the error is returned.
    pub async fn save_stream_to_storage<R>(
        &self,
        reader: &mut R,
        file_name: &str,
        key: &str,
    ) -> StorageResult<PathBuf>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path = self.path_for(file_name);

        match write_stream(reader, &path).await {
            Ok(bytes) => {
                info!(key, path = %path.display(), bytes, "Saved stream to scratch");
                Ok(path)
            }
            Err(e) => {
                error!(key, path = %path.display(), "Failed to save stream: {}", e);
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    if rm.kind() != ErrorKind::NotFound {
                        warn!(key, path = %path.display(), "Failed to remove partial file: {}", rm);
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Delete a scratch file. Missing files count as deleted.
    ///
    /// Retries with linear backoff; a final failure is logged, never returned.
    pub async fn delete_file(&self, path: &Path, key: &str) {
        let result = retry_linear(
            "scratch delete",
            DELETE_ATTEMPTS,
            self.config.delete_retry_unit,
            |_| async move {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e),
                }
            },
        )
        .await;

        match result {
            Ok(()) => debug!(key, path = %path.display(), "Deleted scratch file"),
            Err(e) => error!(
                key,
                path = %path.display(),
                "Giving up on scratch file after {} attempts: {}",
                DELETE_ATTEMPTS,
                e
            ),
        }
    }
}

async fn write_stream<R>(reader: &mut R, path: &Path) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = tokio::fs::File::create(path).await?;
    let bytes = tokio::io::copy(reader, &mut file).await?;
    file.flush().await?;
    Ok(bytes)
}

/// Tracks scratch files created for one job.
///
/// Each tracked path is deleted exactly once: by [`cleanup`](Self::cleanup),
/// or by `Drop` if cleanup never ran.
pub struct ScratchFiles<'a> {
    storage: &'a ScratchStorage,
    key: String,
    paths: Mutex<Vec<PathBuf>>,
}

impl<'a> ScratchFiles<'a> {
    pub fn new(storage: &'a ScratchStorage, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            paths: Mutex::new(Vec::new()),
        }
    }

    pub fn storage(&self) -> &'a ScratchStorage {
        self.storage
    }

    /// Register a path for cleanup. Returns it for chaining.
    pub fn track(&self, path: PathBuf) -> PathBuf {
        let mut paths = self.lock();
        if !paths.contains(&path) {
            paths.push(path.clone());
        }
        path
    }

    /// Scratch path for `file_name`, already registered for cleanup.
    pub fn reserve(&self, file_name: &str) -> PathBuf {
        self.track(self.storage.path_for(file_name))
    }

    pub fn tracked(&self) -> Vec<PathBuf> {
        self.lock().clone()
    }

    /// Delete every tracked file.
    pub async fn cleanup(&self) {
        let paths = std::mem::take(&mut *self.lock());
        for path in paths {
            self.storage.delete_file(&path, &self.key).await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PathBuf>> {
        self.paths.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ScratchFiles<'_> {
    fn drop(&mut self) {
        let paths = std::mem::take(&mut *self.lock());
        for path in paths {
            match std::fs::remove_file(&path) {
                Ok(()) => warn!(key = %self.key, path = %path.display(), "Removed scratch file on drop"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => error!(key = %self.key, path = %path.display(), "Failed to remove scratch file on drop: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(dir: &tempfile::TempDir) -> ScratchStorage {
        ScratchStorage::new(ScratchConfig {
            root: dir.path().join("scratch"),
            min_free_bytes: 0,
            delete_retry_unit: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn ensure_initialized_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = storage(&dir);
        scratch.ensure_initialized().await.unwrap();
        scratch.ensure_initialized().await.unwrap();
        assert!(scratch.root().is_dir());
    }

    #[tokio::test]
    async fn saves_stream_and_deletes_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = storage(&dir);
        scratch.ensure_initialized().await.unwrap();

        let mut data: &[u8] = b"hello scratch";
        let path = scratch
            .save_stream_to_storage(&mut data, "a.wav", "a.wav")
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello scratch");

        scratch.delete_file(&path, "a.wav").await;
        assert!(!path.exists());
        scratch.delete_file(&path, "a.wav").await;
    }

    #[tokio::test]
    async fn failed_save_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = storage(&dir);
        scratch.ensure_initialized().await.unwrap();

        let mut reader = tokio_test::io::Builder::new()
            .read(b"partial")
            .read_error(std::io::Error::new(ErrorKind::ConnectionReset, "reset"))
            .build();
        let err = scratch
            .save_stream_to_storage(&mut reader, "broken.wav", "broken.wav")
            .await;
        assert!(err.is_err());
        assert!(!scratch.path_for("broken.wav").exists());
    }

    #[test]
    fn check_space_honours_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut scratch = ScratchStorage::new(ScratchConfig {
            root: dir.path().to_path_buf(),
            ..ScratchConfig::default()
        });
        scratch.config.min_free_bytes = 0;
        assert!(scratch.check_space("k"));
        scratch.config.min_free_bytes = u64::MAX;
        assert!(!scratch.check_space("k"));
    }

    #[tokio::test]
    async fn tracker_cleans_up_once() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = storage(&dir);
        scratch.ensure_initialized().await.unwrap();

        let files = ScratchFiles::new(&scratch, "job");
        let a = files.reserve("a.mp3");
        let b = files.reserve("b.mp4");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();
        files.track(a.clone());

        files.cleanup().await;
        assert!(!a.exists() && !b.exists());
        assert!(files.tracked().is_empty());
    }

    #[tokio::test]
    async fn tracker_drop_removes_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = storage(&dir);
        scratch.ensure_initialized().await.unwrap();

        let path = {
            let files = ScratchFiles::new(&scratch, "job");
            let path = files.reserve("left.wav");
            std::fs::write(&path, b"x").unwrap();
            path
        };
        assert!(!path.exists());
    }
}
