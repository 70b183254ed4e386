//! Automatic speech recognition through an external transcription service.
//!
//! The service fetches the audio itself from a presigned URL; the worker
//! submits the job and polls until the transcript is ready.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use scribe_models::{AsrJob, Job, QueueName};
use scribe_storage::StorageGateway;

use crate::config::AsrConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::handler::{decode_payload, JobHandler};

#[derive(Debug, Deserialize)]
struct TranscriptStatus {
    id: String,
    status: String,
    #[serde(default)]
    error: Option<String>,
}

pub struct AsrHandler {
    gateway: Arc<StorageGateway>,
    http: Client,
    config: AsrConfig,
}

impl AsrHandler {
    pub fn new(gateway: Arc<StorageGateway>, http: Client, config: AsrConfig) -> Self {
        Self {
            gateway,
            http,
            config,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// Transcribe `{fileId}.mp3` and return the service's transcript document.
    pub async fn transcribe(&self, file_id: &str) -> WorkerResult<serde_json::Value> {
        let started = Instant::now();
        let audio_url = self
            .gateway
            .presign(&format!("{file_id}.mp3"), self.config.url_expiry)
            .await?;

        let submitted: TranscriptStatus = self
            .http
            .post(self.endpoint("/v2/transcript"))
            .header("authorization", &self.config.api_key)
            .json(&json!({ "audio_url": audio_url, "speaker_labels": true }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        info!(file_id, transcript_id = %submitted.id, "Submitted audio for transcription");

        let transcript = self.wait_for(file_id, &submitted.id, started).await?;

        let has_words = transcript
            .get("words")
            .and_then(|w| w.as_array())
            .is_some_and(|w| !w.is_empty());
        if !has_words {
            return Err(WorkerError::asr_failed(format!("no words returned for {file_id}")));
        }

        let elapsed = started.elapsed().as_secs();
        info!(file_id, elapsed_secs = elapsed, "Transcription completed");
        Ok(json!({
            "fileId": file_id,
            "transcriptId": submitted.id,
            "elapsedSecs": elapsed,
            "transcript": transcript,
        }))
    }

    async fn wait_for(
        &self,
        file_id: &str,
        transcript_id: &str,
        started: Instant,
    ) -> WorkerResult<serde_json::Value> {
        let url = self.endpoint(&format!("/v2/transcript/{transcript_id}"));
        loop {
            let body: serde_json::Value = self
                .http
                .get(&url)
                .header("authorization", &self.config.api_key)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let status: TranscriptStatus = serde_json::from_value(body.clone())?;

            match status.status.as_str() {
                "completed" => return Ok(body),
                "error" => {
                    return Err(WorkerError::asr_failed(
                        status.error.unwrap_or_else(|| "transcription failed".to_string()),
                    ))
                }
                other => debug!(file_id, status = other, "Transcript not ready"),
            }

            if started.elapsed() >= self.config.max_wait {
                return Err(WorkerError::asr_failed(format!(
                    "transcript {transcript_id} not ready after {:?}",
                    self.config.max_wait
                )));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl JobHandler for AsrHandler {
    fn queue(&self) -> QueueName {
        QueueName::AutomaticSpeechRecognition
    }

    async fn handle(&self, job: &Job) -> WorkerResult<serde_json::Value> {
        let payload: AsrJob = decode_payload(job)?;
        self.transcribe(&payload.file_id).await
    }
}
