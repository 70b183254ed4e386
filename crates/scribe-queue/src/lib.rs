//! Durable job queue backed by Redis.
//!
//! This crate provides:
//! - Job enqueueing with a per-file de-duplication index
//! - Atomic claim (waiting → active) with a worker lock
//! - Terminal transitions that retain the job record
//! - Delayed retries and stalled-job recovery
//! - Per-state counts for the scaling controller

pub mod error;
pub mod memory;
pub mod queue;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use scribe_models::{Job, JobId, JobState, QueueName};

pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use queue::{QueueConfig, RedisQueue};

/// Operations every queue backend supports.
///
/// Workers mutate job state only through these calls.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Persist a new waiting job and return its id.
    async fn enqueue(&self, queue: QueueName, payload: serde_json::Value) -> QueueResult<JobId>;

    /// Atomically move one waiting job to active, locked under `token`.
    async fn claim(&self, queue: QueueName, token: &str) -> QueueResult<Option<Job>>;

    /// Mark an active job completed and store its result.
    async fn complete(&self, job: &Job, result: serde_json::Value) -> QueueResult<()>;

    /// Record a failure. Returns the resulting state: `Delayed` while
    /// attempts remain, `Failed` once they are exhausted.
    async fn fail(&self, job: &Job, error: &str) -> QueueResult<JobState>;

    /// Park an active job until `delay` has elapsed.
    async fn retry_later(&self, job: &Job, error: &str, delay: Duration) -> QueueResult<()>;

    /// Move due delayed jobs back to waiting. Returns how many moved.
    async fn promote_delayed(&self, queue: QueueName) -> QueueResult<u64>;

    /// Extend the worker lock on an active job. Returns `false` when the
    /// lock expired or is now held under another token.
    async fn heartbeat(&self, job: &Job, token: &str) -> QueueResult<bool>;

    /// Return active jobs whose worker lock expired to waiting.
    async fn recover_stalled(&self, queue: QueueName) -> QueueResult<u64>;

    /// Count jobs per requested state.
    async fn get_counts(
        &self,
        queue: QueueName,
        states: &[JobState],
    ) -> QueueResult<HashMap<JobState, u64>>;

    /// Whether a pending (waiting, active or delayed) job exists for `file_id`.
    async fn has_existing_job(&self, queue: QueueName, file_id: &str) -> QueueResult<bool>;

    /// Load a job record.
    async fn get_job(&self, queue: QueueName, id: &JobId) -> QueueResult<Option<Job>>;

    /// Enqueue unless a pending job already exists for the payload's `fileId`.
    async fn enqueue_unique(
        &self,
        queue: QueueName,
        payload: serde_json::Value,
    ) -> QueueResult<Option<JobId>> {
        if let Some(file_id) = payload.get("fileId").and_then(|v| v.as_str()) {
            if self.has_existing_job(queue, file_id).await? {
                tracing::info!(queue = %queue, file_id, "Pending job already exists, skipping enqueue");
                return Ok(None);
            }
        }
        self.enqueue(queue, payload).await.map(Some)
    }
}
