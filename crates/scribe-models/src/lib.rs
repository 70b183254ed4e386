//! Shared data models for the Scribe media pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Queue jobs, states and queue names
//! - Typed job payloads for each queue
//! - Handler results and webhook bodies
//! - Retry with exponential backoff

pub mod job;
pub mod payload;
pub mod result;
pub mod retry;

// Re-export common types
pub use job::{Job, JobId, JobState, QueueName};
pub use payload::{AsrJob, ConversionJob, LlmMarkingJob, YoutubeIngestJob};
pub use result::{
    CallbackStatus, ConversionResult, JobOutput, ProcessStatus, WebhookPayload,
    YoutubeIngestResult,
};
pub use retry::{with_retry, with_retry_if, FailureTracker, RetryConfig, RetryMatcher, RetryOutcome};
