//! In-memory [`ObjectStore`] for local runs and tests.
//!
//! Records every multipart call and supports injected failures and delays
//! so transfer behavior can be exercised without a bucket.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::client::{ObjectReader, ObjectStore, UploadedPart};
use crate::error::{StorageError, StorageResult};

#[derive(Default)]
struct Upload {
    key: String,
    parts: HashMap<i32, Bytes>,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Bytes>,
    uploads: HashMap<String, Upload>,
    next_upload: u64,
    failing_parts: HashSet<i32>,
    failing_puts: HashSet<String>,
    part_delays: HashMap<i32, Duration>,
    part_attempts: HashMap<i32, u32>,
    accepted_parts: Vec<i32>,
    completions: Vec<(String, Vec<i32>)>,
    aborts: Vec<String>,
    deletes: Vec<String>,
    puts: Vec<String>,
}

/// Object store held in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store an object directly.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.lock().objects.insert(key.into(), data.into());
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.lock().objects.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().objects.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Make every upload of `part_number` fail.
    pub fn fail_part(&self, part_number: i32) {
        self.lock().failing_parts.insert(part_number);
    }

    /// Make single-part uploads to `key` fail.
    pub fn fail_put(&self, key: impl Into<String>) {
        self.lock().failing_puts.insert(key.into());
    }

    /// Delay uploads of `part_number`.
    pub fn delay_part(&self, part_number: i32, delay: Duration) {
        self.lock().part_delays.insert(part_number, delay);
    }

    /// Upload attempts seen for `part_number`.
    pub fn part_attempts(&self, part_number: i32) -> u32 {
        self.lock().part_attempts.get(&part_number).copied().unwrap_or(0)
    }

    /// Part numbers in the order their uploads succeeded.
    pub fn accepted_parts(&self) -> Vec<i32> {
        self.lock().accepted_parts.clone()
    }

    /// Completion calls as `(upload id, part numbers in call order)`.
    pub fn completions(&self) -> Vec<(String, Vec<i32>)> {
        self.lock().completions.clone()
    }

    /// Upload ids that were aborted.
    pub fn aborts(&self) -> Vec<String> {
        self.lock().aborts.clone()
    }

    /// Upload ids that were created.
    pub fn created_uploads(&self) -> Vec<String> {
        let inner = self.lock();
        (1..=inner.next_upload).map(|n| format!("upload-{n}")).collect()
    }

    /// Keys passed to `delete_object`.
    pub fn deletes(&self) -> Vec<String> {
        self.lock().deletes.clone()
    }

    /// Keys uploaded with `put_file`.
    pub fn puts(&self) -> Vec<String> {
        self.lock().puts.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_object(&self, key: &str) -> StorageResult<ObjectReader> {
        let data = self
            .object(key)
            .ok_or_else(|| StorageError::not_found(key))?;
        Ok(Box::pin(std::io::Cursor::new(data)))
    }

    async fn put_file(&self, path: &Path, key: &str, _content_type: &str) -> StorageResult<()> {
        if self.lock().failing_puts.contains(key) {
            return Err(StorageError::upload_failed(format!("injected failure for {key}")));
        }
        let data = tokio::fs::read(path).await?;
        let mut inner = self.lock();
        inner.puts.push(key.to_string());
        inner.objects.insert(key.to_string(), Bytes::from(data));
        Ok(())
    }

    async fn create_multipart(&self, key: &str, _content_type: &str) -> StorageResult<String> {
        let mut inner = self.lock();
        inner.next_upload += 1;
        let upload_id = format!("upload-{}", inner.next_upload);
        inner.uploads.insert(
            upload_id.clone(),
            Upload {
                key: key.to_string(),
                parts: HashMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<UploadedPart> {
        let (delay, failing) = {
            let mut inner = self.lock();
            *inner.part_attempts.entry(part_number).or_default() += 1;
            (
                inner.part_delays.get(&part_number).copied(),
                inner.failing_parts.contains(&part_number),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(StorageError::upload_failed(format!(
                "injected failure for part {part_number}"
            )));
        }

        let mut inner = self.lock();
        let upload = inner
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::not_found(upload_id))?;
        upload.parts.insert(part_number, body);
        inner.accepted_parts.push(part_number);
        Ok(UploadedPart {
            part_number,
            e_tag: format!("\"etag-{part_number}\""),
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<()> {
        let mut inner = self.lock();
        inner.completions.push((
            upload_id.to_string(),
            parts.iter().map(|p| p.part_number).collect(),
        ));

        let upload = inner
            .uploads
            .remove(upload_id)
            .ok_or_else(|| StorageError::not_found(upload_id))?;

        let mut data = Vec::new();
        for part in parts {
            let chunk = upload.parts.get(&part.part_number).ok_or_else(|| {
                StorageError::multipart_failed(key, upload_id, format!("unknown part {}", part.part_number))
            })?;
            data.extend_from_slice(chunk);
        }
        inner.objects.insert(upload.key, Bytes::from(data));
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> StorageResult<()> {
        let mut inner = self.lock();
        inner.uploads.remove(upload_id);
        inner.aborts.push(upload_id.to_string());
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let mut inner = self.lock();
        inner.deletes.push(key.to_string());
        inner.objects.remove(key);
        Ok(())
    }

    async fn presign_get(&self, key: &str, _expires_in: Duration) -> StorageResult<String> {
        Ok(format!("memory://{key}"))
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        Ok(())
    }
}
