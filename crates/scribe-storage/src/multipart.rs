//! Multipart upload sessions.
//!
//! A session is created by `create_multipart`, collects parts as they
//! finish (in any order), and ends either in a completion call listing the
//! parts by ascending part number or in an abort. Every session that was
//! created reaches one of the two.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use metrics::counter;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info, warn};

use crate::backoff::retry_linear;
use crate::client::{ObjectStore, UploadedPart};
use crate::error::{StorageError, StorageResult};

/// Fixed part size: 20 MiB.
pub const DEFAULT_PART_SIZE: usize = 20 * 1024 * 1024;

/// Multipart transfer settings.
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Bytes per part (the last part may be shorter)
    pub part_size: usize,
    /// Parts in flight at once
    pub concurrency: usize,
    /// Attempts per part
    pub part_attempts: u32,
    /// Unit of the linear backoff between part attempts
    pub retry_unit: Duration,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            concurrency: 4,
            part_attempts: 3,
            retry_unit: Duration::from_secs(1),
        }
    }
}

/// Lifecycle of a multipart session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartState {
    Init,
    Uploading,
    Completing,
    Done,
    Aborting,
    Aborted,
}

/// One multipart upload in progress.
#[derive(Debug)]
pub struct MultipartSession {
    key: String,
    upload_id: String,
    parts: Vec<UploadedPart>,
    state: MultipartState,
}

impl MultipartSession {
    pub fn new(key: impl Into<String>, upload_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            upload_id: upload_id.into(),
            parts: Vec::new(),
            state: MultipartState::Init,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn state(&self) -> MultipartState {
        self.state
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Record a part that the store accepted.
    pub fn record_part(&mut self, part: UploadedPart) {
        if self.state == MultipartState::Init {
            self.state = MultipartState::Uploading;
        }
        self.parts.push(part);
    }

    /// Parts ordered by part number, as required by the completion call.
    pub fn sorted_parts(&self) -> Vec<UploadedPart> {
        let mut parts = self.parts.clone();
        parts.sort_by_key(|p| p.part_number);
        parts
    }

    /// Finalize the session.
    pub async fn complete<S>(&mut self, store: &S) -> StorageResult<()>
    where
        S: ObjectStore + ?Sized,
    {
        if self.parts.is_empty() {
            return Err(StorageError::multipart_failed(
                &self.key,
                &self.upload_id,
                "no parts uploaded",
            ));
        }

        self.state = MultipartState::Completing;
        let parts = self.sorted_parts();
        store
            .complete_multipart(&self.key, &self.upload_id, &parts)
            .await?;
        self.state = MultipartState::Done;

        info!(key = %self.key, upload_id = %self.upload_id, parts = parts.len(), "Completed multipart upload");
        Ok(())
    }

    /// Abort the session. Failures are logged; the original error is what
    /// callers report.
    pub async fn abort<S>(&mut self, store: &S)
    where
        S: ObjectStore + ?Sized,
    {
        self.state = MultipartState::Aborting;
        match store.abort_multipart(&self.key, &self.upload_id).await {
            Ok(()) => {
                self.state = MultipartState::Aborted;
                warn!(key = %self.key, upload_id = %self.upload_id, "Aborted multipart upload");
            }
            Err(e) => error!(
                key = %self.key,
                upload_id = %self.upload_id,
                "Failed to abort multipart upload: {}", e
            ),
        }
    }
}

/// Split a reader into parts of `part_size` bytes.
pub fn read_parts<R>(reader: R, part_size: usize) -> impl Stream<Item = std::io::Result<Bytes>>
where
    R: AsyncRead + Unpin,
{
    stream::try_unfold(reader, move |mut reader| async move {
        let mut buf = BytesMut::with_capacity(part_size);
        while buf.len() < part_size {
            let wanted = (part_size - buf.len()) as u64;
            let n = (&mut reader).take(wanted).read_buf(&mut buf).await?;
            if n == 0 {
                break;
            }
        }
        if buf.is_empty() {
            Ok::<_, std::io::Error>(None)
        } else {
            Ok(Some((buf.freeze(), reader)))
        }
    })
}

/// Upload everything `reader` yields as one multipart object.
///
/// Parts are uploaded concurrently and retried individually. Any failure
/// aborts the session. Returns the number of bytes uploaded.
pub async fn upload_reader<S, R>(
    store: &S,
    reader: R,
    key: &str,
    content_type: &str,
    config: &MultipartConfig,
) -> StorageResult<u64>
where
    S: ObjectStore + ?Sized,
    R: AsyncRead + Unpin + Send,
{
    let upload_id = store.create_multipart(key, content_type).await?;
    let mut session = MultipartSession::new(key, upload_id);
    debug!(key, upload_id = %session.upload_id(), "Created multipart upload");

    let uploaded = upload_parts(store, &mut session, reader, config).await;
    let result = match uploaded {
        Ok(total) => session.complete(store).await.map(|()| total),
        Err(e) => Err(e),
    };

    if let Err(e) = &result {
        error!(key, upload_id = %session.upload_id(), "Multipart upload failed: {}", e);
        session.abort(store).await;
    }
    result
}

async fn upload_parts<S, R>(
    store: &S,
    session: &mut MultipartSession,
    reader: R,
    config: &MultipartConfig,
) -> StorageResult<u64>
where
    S: ObjectStore + ?Sized,
    R: AsyncRead + Unpin + Send,
{
    let key = session.key().to_string();
    let upload_id = session.upload_id().to_string();
    let (key, upload_id) = (key.as_str(), upload_id.as_str());

    let uploads = read_parts(reader, config.part_size)
        .map_err(StorageError::from)
        .enumerate()
        .map(|(index, chunk)| async move {
            let chunk = chunk?;
            let part_number = index as i32 + 1;
            let len = chunk.len() as u64;
            let part = upload_part(store, key, upload_id, part_number, chunk, config).await?;
            Ok::<_, StorageError>((part, len))
        })
        .buffer_unordered(config.concurrency.max(1));
    futures::pin_mut!(uploads);

    let mut total = 0;
    while let Some(result) = uploads.next().await {
        let (part, len) = result?;
        session.record_part(part);
        total += len;
    }
    Ok(total)
}

async fn upload_part<S>(
    store: &S,
    key: &str,
    upload_id: &str,
    part_number: i32,
    body: Bytes,
    config: &MultipartConfig,
) -> StorageResult<UploadedPart>
where
    S: ObjectStore + ?Sized,
{
    let what = format!("part {part_number} of {key}");
    let result = retry_linear(&what, config.part_attempts, config.retry_unit, |_| {
        store.upload_part(key, upload_id, part_number, body.clone())
    })
    .await;

    let outcome = if result.is_ok() { "ok" } else { "error" };
    counter!("scribe_upload_parts_total", "outcome" => outcome).increment(1);

    result.map_err(|e| {
        StorageError::multipart_failed(
            key,
            upload_id,
            format!("part {part_number} failed after {} attempts: {e}", config.part_attempts),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_parts_splits_on_part_size() {
        let data: &[u8] = b"abcdefghij";
        let parts: Vec<Bytes> = read_parts(data, 4).try_collect().await.unwrap();
        assert_eq!(parts, vec![Bytes::from("abcd"), Bytes::from("efgh"), Bytes::from("ij")]);
    }

    #[tokio::test]
    async fn read_parts_of_empty_reader_is_empty() {
        let data: &[u8] = b"";
        let parts: Vec<Bytes> = read_parts(data, 4).try_collect().await.unwrap();
        assert!(parts.is_empty());
    }

    #[test]
    fn session_sorts_parts_for_completion() {
        let mut session = MultipartSession::new("k", "u-1");
        assert_eq!(session.state(), MultipartState::Init);
        for n in [3, 1, 2] {
            session.record_part(UploadedPart {
                part_number: n,
                e_tag: format!("etag-{n}"),
            });
        }
        assert_eq!(session.state(), MultipartState::Uploading);
        let numbers: Vec<i32> = session.sorted_parts().iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
}
