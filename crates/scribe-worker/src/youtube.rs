//! YouTube ingestion: stream a `yt-dlp` download straight into object storage.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use scribe_media::spawn_download;
use scribe_models::{Job, ProcessStatus, QueueName, YoutubeIngestJob, YoutubeIngestResult};
use scribe_storage::StorageGateway;

use crate::error::WorkerResult;
use crate::handler::{decode_payload, JobHandler};

pub struct YoutubeHandler {
    gateway: Arc<StorageGateway>,
    ytdlp_path: PathBuf,
}

impl YoutubeHandler {
    pub fn new(gateway: Arc<StorageGateway>, ytdlp_path: impl Into<PathBuf>) -> Self {
        Self {
            gateway,
            ytdlp_path: ytdlp_path.into(),
        }
    }

    /// Download the video and upload it to `file_key`.
    ///
    /// The multipart session is aborted on any failure, including a
    /// downloader that exits unsuccessfully after partial output.
    pub async fn ingest(&self, job: &YoutubeIngestJob) -> YoutubeIngestResult {
        info!(file_id = %job.file_id, url = %job.youtube_url, "Starting YouTube ingestion");

        match self.stream_to_storage(job).await {
            Ok(bytes) => {
                info!(
                    file_id = %job.file_id,
                    key = %job.file_key,
                    size_mb = %format!("{:.2}", bytes as f64 / (1024.0 * 1024.0)),
                    "Processing completed"
                );
                YoutubeIngestResult {
                    status: ProcessStatus::Success,
                    user_id: job.user_id.clone(),
                    file_id: job.file_id.clone(),
                    youtube_url: job.youtube_url.clone(),
                    file_size: Some(bytes),
                    error: None,
                }
            }
            Err(e) => {
                error!(file_id = %job.file_id, "Error processing file: {}", e);
                YoutubeIngestResult {
                    status: ProcessStatus::Error,
                    user_id: job.user_id.clone(),
                    file_id: job.file_id.clone(),
                    youtube_url: job.youtube_url.clone(),
                    file_size: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn stream_to_storage(&self, job: &YoutubeIngestJob) -> WorkerResult<u64> {
        let stream = spawn_download(&self.ytdlp_path, &job.youtube_url, &job.file_id)?;
        let bytes = self
            .gateway
            .upload_stream(stream, &job.file_key, "video/mp4")
            .await?;
        Ok(bytes)
    }
}

#[async_trait]
impl JobHandler for YoutubeHandler {
    fn queue(&self) -> QueueName {
        QueueName::YoutubeIngestion
    }

    async fn handle(&self, job: &Job) -> WorkerResult<serde_json::Value> {
        let payload: YoutubeIngestJob = decode_payload(job)?;
        let result = self.ingest(&payload).await;
        Ok(serde_json::to_value(result)?)
    }
}
