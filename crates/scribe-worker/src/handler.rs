//! Job handler seam and per-queue handler construction.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use scribe_media::MediaTools;
use scribe_models::{Job, QueueName};
use scribe_storage::StorageGateway;

use crate::asr::AsrHandler;
use crate::config::{AsrConfig, FileCacheConfig, LlmConfig};
use crate::conversion::ConversionHandler;
use crate::error::{WorkerError, WorkerResult};
use crate::marking::MarkingHandler;
use crate::youtube::YoutubeHandler;

/// Processes jobs of one queue.
///
/// `Ok` carries the result stored on the job and sent in the completion
/// webhook; `Err` fails the job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn queue(&self) -> QueueName;

    async fn handle(&self, job: &Job) -> WorkerResult<serde_json::Value>;
}

/// Shared collaborators handed to every handler.
#[derive(Clone)]
pub struct HandlerContext {
    pub gateway: Arc<StorageGateway>,
    pub tools: Arc<dyn MediaTools>,
    pub ytdlp_path: PathBuf,
    pub http: reqwest::Client,
}

/// Build the handler for `queue`, reading its configuration from the environment.
pub fn handler_from_env(queue: QueueName, ctx: HandlerContext) -> WorkerResult<Arc<dyn JobHandler>> {
    let handler: Arc<dyn JobHandler> = match queue {
        QueueName::AudioVideoConversion => Arc::new(ConversionHandler::new(ctx.gateway, ctx.tools)),
        QueueName::YoutubeIngestion => Arc::new(YoutubeHandler::new(ctx.gateway, ctx.ytdlp_path)),
        QueueName::AutomaticSpeechRecognition => {
            Arc::new(AsrHandler::new(ctx.gateway, ctx.http, AsrConfig::from_env()?))
        }
        QueueName::LlmMarking => Arc::new(MarkingHandler::new(
            ctx.gateway,
            ctx.http,
            LlmConfig::from_env()?,
            FileCacheConfig::from_env()?,
        )),
    };
    Ok(handler)
}

/// Decode a job payload, mapping failures to [`WorkerError::InvalidPayload`].
pub fn decode_payload<T: serde::de::DeserializeOwned>(job: &Job) -> WorkerResult<T> {
    job.decode()
        .map_err(|e| WorkerError::invalid_payload(format!("job {}: {}", job.id, e)))
}
