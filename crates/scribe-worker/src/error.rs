//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("{0}")]
    ConversionFailed(String),

    #[error("ASR failed: {0}")]
    AsrFailed(String),

    #[error("LLM call failed: {0}")]
    LlmFailed(String),

    #[error("Webhook failed: {0}")]
    WebhookFailed(String),

    #[error("Scaling failed: {0}")]
    ScalingFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] scribe_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] scribe_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] scribe_queue::QueueError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn conversion_failed(msg: impl Into<String>) -> Self {
        Self::ConversionFailed(msg.into())
    }

    pub fn asr_failed(msg: impl Into<String>) -> Self {
        Self::AsrFailed(msg.into())
    }

    pub fn llm_failed(msg: impl Into<String>) -> Self {
        Self::LlmFailed(msg.into())
    }

    pub fn webhook_failed(msg: impl Into<String>) -> Self {
        Self::WebhookFailed(msg.into())
    }

    pub fn scaling_failed(msg: impl Into<String>) -> Self {
        Self::ScalingFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether a queue-level retry of the whole job may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::DownloadFailed(_)
            | WorkerError::UploadFailed(_)
            | WorkerError::Storage(_)
            | WorkerError::Http(_)
            | WorkerError::Io(_) => true,
            WorkerError::Media(e) => e.is_retryable(),
            _ => false,
        }
    }
}
