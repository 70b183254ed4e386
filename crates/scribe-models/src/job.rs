//! Job records tracked by the durable queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job state in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is waiting to be claimed
    #[default]
    Waiting,
    /// Job is claimed by a worker
    Active,
    /// Job is parked until its retry time
    Delayed,
    /// Job completed successfully
    Completed,
    /// Job failed permanently
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Delayed,
        JobState::Completed,
        JobState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Delayed => "delayed",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// States that count as "pending work" for de-duplication.
    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Waiting | JobState::Active | JobState::Delayed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "delayed" => Ok(JobState::Delayed),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// Named queues served by worker processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    AudioVideoConversion,
    AutomaticSpeechRecognition,
    LlmMarking,
    YoutubeIngestion,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::AudioVideoConversion,
        QueueName::AutomaticSpeechRecognition,
        QueueName::LlmMarking,
        QueueName::YoutubeIngestion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::AudioVideoConversion => "audio-video-conversion",
            QueueName::AutomaticSpeechRecognition => "automatic-speech-recognition",
            QueueName::LlmMarking => "llm-marking",
            QueueName::YoutubeIngestion => "youtube-ingestion",
        }
    }

    /// Application webhook path that receives results for this queue.
    pub fn webhook_path(&self) -> &'static str {
        match self {
            QueueName::AudioVideoConversion => "/api/webhook/conversion-worker",
            QueueName::AutomaticSpeechRecognition => "/api/webhook/asr-worker",
            QueueName::LlmMarking => "/api/webhook/llm-worker",
            QueueName::YoutubeIngestion => "/api/webhook/youtube-worker",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| format!("unknown queue: {s}"))
    }
}

/// A job as stored by the queue.
///
/// The payload is an opaque JSON object; handlers decode it into the
/// typed payload for their queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub queue_name: QueueName,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// Create a fresh waiting job.
    pub fn new(id: JobId, queue_name: QueueName, payload: serde_json::Value) -> Self {
        Self {
            id,
            queue_name,
            payload,
            state: JobState::Waiting,
            attempts: 0,
            created_at: Utc::now(),
            finished_at: None,
            result: None,
            error: None,
        }
    }

    /// Decode the payload into a typed job payload.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// The `fileId` field of the payload, if present.
    pub fn file_id(&self) -> Option<&str> {
        self.payload.get("fileId").and_then(|v| v.as_str())
    }
}
