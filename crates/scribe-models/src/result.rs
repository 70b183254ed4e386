//! Results produced by job handlers and reported back to the application.

use serde::{Deserialize, Serialize};

use crate::JobId;

/// Outcome status of a conversion or ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Success,
    Error,
}

/// Result of one conversion job execution.
///
/// Built once at the end of the handler and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    pub status: ProcessStatus,
    pub user_id: Option<String>,
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConversionResult {
    pub fn success(user_id: Option<String>, file_id: impl Into<String>, duration: Option<f64>) -> Self {
        Self {
            status: ProcessStatus::Success,
            user_id,
            file_id: file_id.into(),
            duration,
            error: None,
        }
    }

    pub fn error(user_id: Option<String>, file_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: ProcessStatus::Error,
            user_id,
            file_id: file_id.into(),
            duration: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ProcessStatus::Success
    }
}

/// Result of a YouTube ingestion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YoutubeIngestResult {
    pub status: ProcessStatus,
    pub user_id: String,
    pub file_id: String,
    pub youtube_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal status reported in webhook callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Completed,
    Failed,
}

/// Value returned by the worker for a processed job: `{status, result}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    pub status: CallbackStatus,
    pub result: serde_json::Value,
}

impl JobOutput {
    pub fn completed(result: serde_json::Value) -> Self {
        Self {
            status: CallbackStatus::Completed,
            result,
        }
    }
}

/// Body of the signed webhook POST sent to the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    pub status: CallbackStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookPayload {
    pub fn completed(job_id: JobId, file_id: Option<String>, result: serde_json::Value) -> Self {
        Self {
            job_id,
            file_id,
            status: CallbackStatus::Completed,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(job_id: JobId, file_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            job_id,
            file_id,
            status: CallbackStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }
}
