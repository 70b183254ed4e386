//! Audio/video conversion pipeline.
//!
//! One job downloads the source into scratch storage, produces an MP3 (and
//! an MP4 for non-MP4 video sources), uploads the derivatives plus a
//! best-effort waveform image, and finally removes the original unless it
//! already is a delivery format. Scratch files are cleaned up on every exit
//! path, and derivatives uploaded before a failure are deleted again.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use scribe_media::{
    conversion_retry_config, convert_with_retry, keeps_original, targets_for, MediaInfo,
    MediaTools, TargetFormat,
};
use scribe_models::{ConversionJob, ConversionResult, Job, QueueName, RetryConfig};
use scribe_storage::{ScratchFiles, StorageGateway};

use crate::error::{WorkerError, WorkerResult};
use crate::handler::{decode_payload, JobHandler};
use crate::metrics::record_conversion;

/// Object key of a derivative: the source key with the target's extension.
pub fn derivative_key(file_key: &str, target: TargetFormat) -> String {
    Path::new(file_key)
        .with_extension(target.extension())
        .to_string_lossy()
        .into_owned()
}

/// Object key of the waveform image for a file.
pub fn waveform_key(file_id: &str) -> String {
    format!("{file_id}_wf.png")
}

/// Remote keys uploaded by the current run, for compensation.
#[derive(Default)]
struct UploadLedger {
    keys: Mutex<Vec<String>>,
}

impl UploadLedger {
    fn record(&self, key: &str) {
        self.lock().push(key.to_string());
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct ConversionHandler {
    gateway: Arc<StorageGateway>,
    tools: Arc<dyn MediaTools>,
    retry_delay: Duration,
}

impl ConversionHandler {
    pub fn new(gateway: Arc<StorageGateway>, tools: Arc<dyn MediaTools>) -> Self {
        Self {
            gateway,
            tools,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Base delay between encoder attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn retry_config(&self, target: TargetFormat) -> RetryConfig {
        conversion_retry_config(target).with_initial_delay(self.retry_delay)
    }

    /// Run the pipeline for one source file.
    ///
    /// Never fails: errors are reported in the returned result.
    pub async fn convert(&self, job: &ConversionJob) -> ConversionResult {
        let file_id = job.resolved_file_id();
        let targets = targets_for(&job.file_key);

        if targets.is_empty() {
            info!(key = %job.file_key, file_id = %file_id, "Source is already MP3, nothing to convert");
            record_conversion("skipped");
            return ConversionResult::success(job.user_id.clone(), file_id, None);
        }

        let started = Instant::now();
        info!(key = %job.file_key, file_id = %file_id, ?targets, "Processing file");

        let scratch = ScratchFiles::new(self.gateway.scratch(), job.file_key.clone());
        let uploads = UploadLedger::default();

        let outcome = self.run(job, &file_id, &targets, &scratch, &uploads).await;
        scratch.cleanup().await;

        match outcome {
            Ok(duration) => {
                info!(
                    key = %job.file_key,
                    file_id = %file_id,
                    duration,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "Processing completed"
                );
                record_conversion("success");
                ConversionResult::success(job.user_id.clone(), file_id, duration)
            }
            Err(e) => {
                error!(key = %job.file_key, file_id = %file_id, "Error processing file: {}", e);
                for key in uploads.take() {
                    self.gateway.delete_remote(&key).await;
                }
                record_conversion("error");
                ConversionResult::error(job.user_id.clone(), file_id, e.to_string())
            }
        }
    }

    async fn run(
        &self,
        job: &ConversionJob,
        file_id: &str,
        targets: &[TargetFormat],
        scratch: &ScratchFiles<'_>,
        uploads: &UploadLedger,
    ) -> WorkerResult<Option<f64>> {
        let storage = self.gateway.scratch();
        storage.ensure_initialized().await?;
        storage.require_space(&job.file_key)?;

        let source = self
            .gateway
            .download(&job.file_key)
            .await
            .ok_or_else(|| WorkerError::download_failed(format!("could not download {}", job.file_key)))?;
        let source = scratch.track(source);

        let info = self.tools.probe(&source).await?;
        debug!(file_id, ?info, "Probed source");

        // MP3 is uploaded as soon as it is ready while the MP4 still encodes.
        let audio = self.produce_audio(job, file_id, &source, &info, scratch, uploads);
        let video = async {
            if !targets.contains(&TargetFormat::Mp4) {
                return Ok(None);
            }
            let output = scratch.reserve(&format!("{file_id}.mp4"));
            self.encode(TargetFormat::Mp4, &source, &output, &info)
                .await
                .map(|()| Some(output))
        };
        let (audio, video) = tokio::join!(audio, video);
        let mp3_path = audio?;

        if let Some(mp4_path) = video? {
            self.upload(&mp4_path, &derivative_key(&job.file_key, TargetFormat::Mp4), uploads)
                .await?;
        }

        let duration = self
            .tools
            .probe(&mp3_path)
            .await
            .map_err(|e| WorkerError::conversion_failed(format!("Converted MP3 is unreadable: {e}")))?
            .duration;

        if keeps_original(&job.file_key) {
            debug!(key = %job.file_key, "Keeping original");
        } else {
            self.gateway.delete_remote(&job.file_key).await;
        }

        Ok(duration)
    }

    async fn produce_audio(
        &self,
        job: &ConversionJob,
        file_id: &str,
        source: &Path,
        info: &MediaInfo,
        scratch: &ScratchFiles<'_>,
        uploads: &UploadLedger,
    ) -> WorkerResult<PathBuf> {
        let output = scratch.reserve(&format!("{file_id}.mp3"));
        self.encode(TargetFormat::Mp3, source, &output, info).await?;
        self.upload(&output, &derivative_key(&job.file_key, TargetFormat::Mp3), uploads)
            .await?;
        self.attach_waveform(file_id, &output, scratch, uploads).await;
        Ok(output)
    }

    async fn encode(
        &self,
        target: TargetFormat,
        input: &Path,
        output: &Path,
        info: &MediaInfo,
    ) -> WorkerResult<()> {
        convert_with_retry(
            self.tools.as_ref(),
            target,
            input,
            output,
            info,
            &self.retry_config(target),
        )
        .await
        .map_err(|e| {
            WorkerError::conversion_failed(format!(
                "{} conversion failed: {}",
                target.extension().to_uppercase(),
                e
            ))
        })
    }

    async fn upload(&self, path: &Path, key: &str, uploads: &UploadLedger) -> WorkerResult<()> {
        self.gateway
            .upload(path, key)
            .await
            .map_err(|e| WorkerError::upload_failed(format!("{key}: {e}")))?;
        uploads.record(key);
        info!(key, "Uploaded derivative");
        Ok(())
    }

    /// Render and upload the waveform. Failures are logged only.
    async fn attach_waveform(
        &self,
        file_id: &str,
        audio: &Path,
        scratch: &ScratchFiles<'_>,
        uploads: &UploadLedger,
    ) {
        let wav = scratch.reserve(&format!("{file_id}_wf.wav"));
        let png = scratch.reserve(&format!("{file_id}_wf.png"));
        let key = waveform_key(file_id);

        if let Err(e) = self.tools.waveform(audio, &wav, &png).await {
            warn!(file_id, "Waveform generation failed: {}", e);
            return;
        }
        match self.gateway.upload(&png, &key).await {
            Ok(()) => uploads.record(&key),
            Err(e) => warn!(file_id, key = %key, "Waveform upload failed: {}", e),
        }
    }
}

#[async_trait]
impl JobHandler for ConversionHandler {
    fn queue(&self) -> QueueName {
        QueueName::AudioVideoConversion
    }

    async fn handle(&self, job: &Job) -> WorkerResult<serde_json::Value> {
        let payload: ConversionJob = decode_payload(job)?;
        let result = self.convert(&payload).await;
        Ok(serde_json::to_value(result)?)
    }
}
