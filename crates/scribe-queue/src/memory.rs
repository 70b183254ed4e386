//! In-process queue with the same transitions as [`RedisQueue`](crate::RedisQueue).
//!
//! Used for local runs without Redis and by tests of components that sit on
//! top of [`JobQueue`].

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use scribe_models::{Job, JobId, JobState, QueueName};
use tokio::time::Instant;

use crate::error::{QueueError, QueueResult};
use crate::JobQueue;

#[derive(Default)]
struct Lanes {
    waiting: VecDeque<JobId>,
    active: Vec<JobId>,
    delayed: Vec<(Instant, JobId)>,
    completed: Vec<JobId>,
    failed: Vec<JobId>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    jobs: HashMap<JobId, Job>,
    lanes: HashMap<QueueName, Lanes>,
    locks: HashMap<JobId, Lock>,
}

struct Lock {
    token: String,
    deadline: Instant,
}

impl State {
    fn lanes(&mut self, queue: QueueName) -> &mut Lanes {
        self.lanes.entry(queue).or_default()
    }

    fn job_mut(&mut self, id: &JobId) -> QueueResult<&mut Job> {
        self.jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))
    }

    fn leave_active(&mut self, job: &Job) {
        self.lanes(job.queue_name).active.retain(|id| id != &job.id);
        self.locks.remove(&job.id);
    }
}

/// Queue held entirely in memory.
pub struct MemoryQueue {
    state: Mutex<State>,
    max_attempts: u32,
    retry_delay: Duration,
    lock_ttl: Duration,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(1, Duration::from_secs(30), Duration::from_secs(60))
    }
}

impl MemoryQueue {
    pub fn new(max_attempts: u32, retry_delay: Duration, lock_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_attempts: max_attempts.max(1),
            retry_delay,
            lock_ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, queue: QueueName, payload: serde_json::Value) -> QueueResult<JobId> {
        let mut state = self.lock();
        state.next_id += 1;
        let id = JobId::from_string(state.next_id.to_string());
        state.jobs.insert(id.clone(), Job::new(id.clone(), queue, payload));
        state.lanes(queue).waiting.push_back(id.clone());
        Ok(id)
    }

    async fn claim(&self, queue: QueueName, token: &str) -> QueueResult<Option<Job>> {
        self.promote_delayed(queue).await?;

        let mut state = self.lock();
        let Some(id) = state.lanes(queue).waiting.pop_front() else {
            return Ok(None);
        };
        state.lanes(queue).active.push(id.clone());
        let lock = Lock {
            token: token.to_string(),
            deadline: Instant::now() + self.lock_ttl,
        };
        state.locks.insert(id.clone(), lock);

        let job = state.job_mut(&id)?;
        job.state = JobState::Active;
        job.attempts += 1;
        Ok(Some(job.clone()))
    }

    async fn complete(&self, job: &Job, result: serde_json::Value) -> QueueResult<()> {
        let mut state = self.lock();
        state.leave_active(job);
        state.lanes(job.queue_name).completed.push(job.id.clone());

        let record = state.job_mut(&job.id)?;
        record.state = JobState::Completed;
        record.result = Some(result);
        record.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &str) -> QueueResult<JobState> {
        if job.attempts < self.max_attempts {
            self.retry_later(job, error, self.retry_delay).await?;
            return Ok(JobState::Delayed);
        }

        let mut state = self.lock();
        state.leave_active(job);
        state.lanes(job.queue_name).failed.push(job.id.clone());

        let record = state.job_mut(&job.id)?;
        record.state = JobState::Failed;
        record.error = Some(error.to_string());
        record.finished_at = Some(Utc::now());
        Ok(JobState::Failed)
    }

    async fn retry_later(&self, job: &Job, error: &str, delay: Duration) -> QueueResult<()> {
        let mut state = self.lock();
        state.leave_active(job);
        state
            .lanes(job.queue_name)
            .delayed
            .push((Instant::now() + delay, job.id.clone()));

        let record = state.job_mut(&job.id)?;
        record.state = JobState::Delayed;
        record.error = Some(error.to_string());
        Ok(())
    }

    async fn promote_delayed(&self, queue: QueueName) -> QueueResult<u64> {
        let mut state = self.lock();
        let now = Instant::now();
        let lanes = state.lanes(queue);
        let (due, later): (Vec<_>, Vec<_>) = lanes.delayed.drain(..).partition(|(at, _)| *at <= now);
        lanes.delayed = later;
        for (_, id) in &due {
            lanes.waiting.push_back(id.clone());
        }
        for (_, id) in &due {
            state.job_mut(id)?.state = JobState::Waiting;
        }
        Ok(due.len() as u64)
    }

    async fn heartbeat(&self, job: &Job, token: &str) -> QueueResult<bool> {
        let mut state = self.lock();
        let now = Instant::now();
        match state.locks.get_mut(&job.id) {
            Some(lock) if lock.token == token && lock.deadline > now => {
                lock.deadline = now + self.lock_ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn recover_stalled(&self, queue: QueueName) -> QueueResult<u64> {
        let mut state = self.lock();
        let now = Instant::now();
        let active = state.lanes(queue).active.clone();
        let stalled: Vec<JobId> = active
            .into_iter()
            .filter(|id| state.locks.get(id).map_or(true, |lock| lock.deadline <= now))
            .collect();

        for id in &stalled {
            state.locks.remove(id);
            let lanes = state.lanes(queue);
            lanes.active.retain(|a| a != id);
            lanes.waiting.push_front(id.clone());
            state.job_mut(id)?.state = JobState::Waiting;
        }
        Ok(stalled.len() as u64)
    }

    async fn get_counts(
        &self,
        queue: QueueName,
        states: &[JobState],
    ) -> QueueResult<HashMap<JobState, u64>> {
        let mut state = self.lock();
        let lanes = state.lanes(queue);
        Ok(states
            .iter()
            .map(|s| {
                let count = match s {
                    JobState::Waiting => lanes.waiting.len(),
                    JobState::Active => lanes.active.len(),
                    JobState::Delayed => lanes.delayed.len(),
                    JobState::Completed => lanes.completed.len(),
                    JobState::Failed => lanes.failed.len(),
                };
                (*s, count as u64)
            })
            .collect())
    }

    async fn has_existing_job(&self, queue: QueueName, file_id: &str) -> QueueResult<bool> {
        let state = self.lock();
        Ok(state.jobs.values().any(|job| {
            job.queue_name == queue && job.state.is_pending() && job.file_id() == Some(file_id)
        }))
    }

    async fn get_job(&self, queue: QueueName, id: &JobId) -> QueueResult<Option<Job>> {
        let state = self.lock();
        Ok(state
            .jobs
            .get(id)
            .filter(|job| job.queue_name == queue)
            .cloned())
    }
}
