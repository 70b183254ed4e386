//! Object storage gateway: transfers between the remote store and scratch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{error, info, warn};

use crate::backoff::retry_linear;
use crate::client::ObjectStore;
use crate::error::{StorageError, StorageResult};
use crate::multipart::{upload_reader, MultipartConfig};
use crate::scratch::ScratchStorage;

/// Largest payload sent in a single request: 100 MiB.
pub const SINGLE_PART_LIMIT: u64 = 100 * 1024 * 1024;

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Files above this size use multipart upload
    pub single_part_limit: u64,
    /// Attempts for single-part uploads
    pub single_part_attempts: u32,
    /// Unit of the linear backoff between single-part attempts
    pub retry_unit: Duration,
    pub multipart: MultipartConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            single_part_limit: SINGLE_PART_LIMIT,
            single_part_attempts: 3,
            retry_unit: Duration::from_secs(1),
            multipart: MultipartConfig::default(),
        }
    }
}

/// Downloads into and uploads from the scratch directory.
#[derive(Clone)]
pub struct StorageGateway {
    store: Arc<dyn ObjectStore>,
    scratch: Arc<ScratchStorage>,
    config: GatewayConfig,
}

impl StorageGateway {
    pub fn new(store: Arc<dyn ObjectStore>, scratch: Arc<ScratchStorage>) -> Self {
        Self::with_config(store, scratch, GatewayConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn ObjectStore>,
        scratch: Arc<ScratchStorage>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            store,
            scratch,
            config,
        }
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn scratch(&self) -> &ScratchStorage {
        &self.scratch
    }

    /// Stream an object into a scratch file named after the key.
    ///
    /// Returns `None` (after logging) when space is short or the transfer fails.
    pub async fn download(&self, key: &str) -> Option<PathBuf> {
        if !self.scratch.check_space(key) {
            error!(key, "Not enough scratch space to download");
            return None;
        }

        let mut reader = match self.store.get_object(key).await {
            Ok(reader) => reader,
            Err(e) => {
                error!(key, "Failed to open object: {}", e);
                return None;
            }
        };

        match self
            .scratch
            .save_stream_to_storage(&mut reader, &scratch_name(key), key)
            .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                error!(key, "Failed to download object: {}", e);
                None
            }
        }
    }

    /// Read a whole object into memory.
    pub async fn fetch_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        let mut reader = self.store.get_object(key).await?;
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| StorageError::download_failed(format!("{key}: {e}")))?;
        Ok(data)
    }

    /// Upload a file, choosing single-part or multipart by size.
    pub async fn upload(&self, path: &Path, key: &str) -> StorageResult<()> {
        let size = tokio::fs::metadata(path).await?.len();
        if size <= self.config.single_part_limit {
            self.upload_single_part(path, key).await
        } else {
            self.upload_multipart(path, key, size).await
        }
    }

    /// Upload a file in one request, retrying with linear backoff.
    pub async fn upload_single_part(&self, path: &Path, key: &str) -> StorageResult<()> {
        let content_type = content_type_for(key);
        retry_linear(
            &format!("upload {key}"),
            self.config.single_part_attempts,
            self.config.retry_unit,
            |_| self.store.put_file(path, key, content_type),
        )
        .await
    }

    /// Upload a file in parts.
    pub async fn upload_multipart(&self, path: &Path, key: &str, size: u64) -> StorageResult<()> {
        let part_size = self.config.multipart.part_size as u64;
        info!(
            key,
            size,
            parts = size.div_ceil(part_size.max(1)),
            "Starting multipart upload"
        );

        let file = tokio::fs::File::open(path).await?;
        let uploaded = upload_reader(
            self.store.as_ref(),
            file,
            key,
            content_type_for(key),
            &self.config.multipart,
        )
        .await?;

        if uploaded != size {
            warn!(key, size, uploaded, "File size changed during upload");
        }
        Ok(())
    }

    /// Upload an unbounded stream in parts. Returns the bytes uploaded.
    pub async fn upload_stream<R>(
        &self,
        reader: R,
        key: &str,
        content_type: &str,
    ) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let bytes = upload_reader(
            self.store.as_ref(),
            reader,
            key,
            content_type,
            &self.config.multipart,
        )
        .await?;
        info!(key, bytes, "Uploaded stream");
        Ok(bytes)
    }

    /// Delete a remote object. Failures are logged only.
    pub async fn delete_remote(&self, key: &str) {
        match self.store.delete_object(key).await {
            Ok(()) => info!(key, "Deleted remote object"),
            Err(e) => warn!(key, "Failed to delete remote object: {}", e),
        }
    }

    /// Presigned GET URL for an object.
    pub async fn presign(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        self.store.presign_get(key, expires_in).await
    }
}

/// Scratch file name for an object key.
pub fn scratch_name(key: &str) -> String {
    key.replace(['/', '\\'], "_")
}

/// MIME type for the derived artifacts the pipeline stores.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        Some("wav") => "audio/wav",
        Some("png") => "image/png",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}
