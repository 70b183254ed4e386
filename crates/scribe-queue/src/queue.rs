//! Job queue using Redis lists, sorted sets and hashes.
//!
//! Key layout for prefix `p` and queue `q`:
//!
//! | key              | type   | contents                              |
//! |------------------|--------|---------------------------------------|
//! | `p:q:id`         | string | job id counter                        |
//! | `p:q:job:{id}`   | hash   | job record                            |
//! | `p:q:waiting`    | list   | ids, claimed from the right           |
//! | `p:q:active`     | list   | ids currently held by a worker        |
//! | `p:q:delayed`    | zset   | ids scored by due time (epoch millis) |
//! | `p:q:completed`  | set    | retained completed ids                |
//! | `p:q:failed`     | set    | retained failed ids                   |
//! | `p:q:lock:{id}`  | string | worker lock, expires after the TTL    |
//! | `p:q:file:{fid}` | set    | ids of jobs created for a file id     |

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::Script;
use scribe_models::{Job, JobId, JobState, QueueName};
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::JobQueue;

/// Atomically claim the oldest waiting job and take its lock.
const CLAIM_SCRIPT: &str = r#"
local id = redis.call('LMOVE', KEYS[1], KEYS[2], 'RIGHT', 'LEFT')
if not id then
  return false
end
local job_key = ARGV[1] .. id
redis.call('HSET', job_key, 'state', 'active')
redis.call('HINCRBY', job_key, 'attempts', 1)
redis.call('SET', ARGV[2] .. id, ARGV[3], 'PX', ARGV[4])
return id
"#;

/// Move due delayed jobs to waiting.
const PROMOTE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, id in ipairs(ids) do
  if redis.call('ZREM', KEYS[1], id) == 1 then
    redis.call('LPUSH', KEYS[2], id)
    redis.call('HSET', ARGV[3] .. id, 'state', 'waiting')
  end
end
return #ids
"#;

/// Return active jobs without a live lock to the claim end of waiting.
const RECOVER_SCRIPT: &str = r#"
local ids = redis.call('LRANGE', KEYS[1], 0, -1)
local moved = 0
for _, id in ipairs(ids) do
  if redis.call('EXISTS', ARGV[1] .. id) == 0 then
    if redis.call('LREM', KEYS[1], 0, id) > 0 then
      redis.call('RPUSH', KEYS[2], id)
      redis.call('HSET', ARGV[2] .. id, 'state', 'waiting')
      moved = moved + 1
    end
  end
end
return moved
"#;

/// Extend a worker lock only while `token` still owns it.
const EXTEND_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

const PROMOTE_BATCH: u32 = 100;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key
    pub prefix: String,
    /// Attempts before a job is failed permanently
    pub max_attempts: u32,
    /// Delay before a failed job with attempts left is retried
    pub retry_delay: Duration,
    /// Worker lock lifetime; an active job without a live lock is stalled
    pub lock_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            prefix: "scribe".to_string(),
            max_attempts: 1,
            retry_delay: Duration::from_secs(30),
            lock_ttl: Duration::from_secs(60),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            prefix: std::env::var("QUEUE_PREFIX").unwrap_or(defaults.prefix),
            max_attempts: std::env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            retry_delay: std::env::var("QUEUE_RETRY_DELAY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_delay),
            lock_ttl: std::env::var("QUEUE_LOCK_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_ttl),
        }
    }
}

/// Redis-backed job queue client.
pub struct RedisQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Underlying client, shared with components that need their own keys.
    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    /// Check that Redis answers.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply != "PONG" {
            return Err(QueueError::connection_failed(format!(
                "unexpected PING reply: {reply}"
            )));
        }
        Ok(())
    }

    async fn connection(&self) -> QueueResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    fn key(&self, queue: QueueName, suffix: &str) -> String {
        format!("{}:{}:{}", self.config.prefix, queue, suffix)
    }

    fn job_key(&self, queue: QueueName, id: &str) -> String {
        self.key(queue, &format!("job:{id}"))
    }

    fn lock_key(&self, queue: QueueName, id: &str) -> String {
        self.key(queue, &format!("lock:{id}"))
    }

    fn file_key(&self, queue: QueueName, file_id: &str) -> String {
        self.key(queue, &format!("file:{file_id}"))
    }

    fn state_key(&self, queue: QueueName, state: JobState) -> String {
        self.key(queue, state.as_str())
    }

    /// Common terminal transition: leave active, record the outcome, retain the id.
    async fn finish(
        &self,
        job: &Job,
        state: JobState,
        field: &str,
        value: String,
    ) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let queue = job.queue_name;
        let id = job.id.as_str();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("LREM")
            .arg(self.state_key(queue, JobState::Active))
            .arg(0)
            .arg(id)
            .ignore()
            .cmd("HSET")
            .arg(self.job_key(queue, id))
            .arg("state")
            .arg(state.as_str())
            .arg(field)
            .arg(value)
            .arg("finishedAt")
            .arg(Utc::now().to_rfc3339())
            .ignore()
            .cmd("SADD")
            .arg(self.state_key(queue, state))
            .arg(id)
            .ignore()
            .cmd("DEL")
            .arg(self.lock_key(queue, id))
            .ignore();
        if let Some(file_id) = job.file_id() {
            pipe.cmd("SREM")
                .arg(self.file_key(queue, file_id))
                .arg(id)
                .ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, queue: QueueName, payload: serde_json::Value) -> QueueResult<JobId> {
        let mut conn = self.connection().await?;

        let id: u64 = redis::cmd("INCR")
            .arg(self.key(queue, "id"))
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;
        let job = Job::new(JobId::from_string(id.to_string()), queue, payload);
        let id = job.id.as_str();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSET")
            .arg(self.job_key(queue, id))
            .arg("queue")
            .arg(queue.as_str())
            .arg("payload")
            .arg(serde_json::to_string(&job.payload)?)
            .arg("state")
            .arg(JobState::Waiting.as_str())
            .arg("attempts")
            .arg(0)
            .arg("createdAt")
            .arg(job.created_at.to_rfc3339())
            .ignore()
            .cmd("LPUSH")
            .arg(self.state_key(queue, JobState::Waiting))
            .arg(id)
            .ignore();
        if let Some(file_id) = job.file_id() {
            pipe.cmd("SADD")
                .arg(self.file_key(queue, file_id))
                .arg(id)
                .ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!(queue = %queue, job_id = %job.id, "Enqueued job");
        Ok(job.id)
    }

    async fn claim(&self, queue: QueueName, token: &str) -> QueueResult<Option<Job>> {
        self.promote_delayed(queue).await?;

        let mut conn = self.connection().await?;
        let claimed: Option<String> = Script::new(CLAIM_SCRIPT)
            .key(self.state_key(queue, JobState::Waiting))
            .key(self.state_key(queue, JobState::Active))
            .arg(self.job_key(queue, ""))
            .arg(self.lock_key(queue, ""))
            .arg(token)
            .arg(self.config.lock_ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;

        let Some(id) = claimed else {
            return Ok(None);
        };

        let id = JobId::from_string(id);
        match self.get_job(queue, &id).await? {
            Some(job) => {
                debug!(queue = %queue, job_id = %job.id, attempts = job.attempts, "Claimed job");
                Ok(Some(job))
            }
            None => Err(QueueError::JobNotFound(id.to_string())),
        }
    }

    async fn complete(&self, job: &Job, result: serde_json::Value) -> QueueResult<()> {
        self.finish(job, JobState::Completed, "result", serde_json::to_string(&result)?)
            .await?;
        info!(queue = %job.queue_name, job_id = %job.id, "Job completed");
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &str) -> QueueResult<JobState> {
        if job.attempts < self.config.max_attempts {
            self.retry_later(job, error, self.config.retry_delay).await?;
            return Ok(JobState::Delayed);
        }

        self.finish(job, JobState::Failed, "error", error.to_string())
            .await?;
        warn!(queue = %job.queue_name, job_id = %job.id, attempts = job.attempts, "Job failed: {}", error);
        Ok(JobState::Failed)
    }

    async fn retry_later(&self, job: &Job, error: &str, delay: Duration) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let queue = job.queue_name;
        let id = job.id.as_str();
        let due = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(self.state_key(queue, JobState::Active))
            .arg(0)
            .arg(id)
            .ignore()
            .cmd("ZADD")
            .arg(self.state_key(queue, JobState::Delayed))
            .arg(due)
            .arg(id)
            .ignore()
            .cmd("HSET")
            .arg(self.job_key(queue, id))
            .arg("state")
            .arg(JobState::Delayed.as_str())
            .arg("error")
            .arg(error)
            .ignore()
            .cmd("DEL")
            .arg(self.lock_key(queue, id))
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        info!(queue = %queue, job_id = %job.id, delay_secs = delay.as_secs(), "Job delayed for retry");
        Ok(())
    }

    async fn promote_delayed(&self, queue: QueueName) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let moved: u64 = Script::new(PROMOTE_SCRIPT)
            .key(self.state_key(queue, JobState::Delayed))
            .key(self.state_key(queue, JobState::Waiting))
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .arg(self.job_key(queue, ""))
            .invoke_async(&mut conn)
            .await?;
        if moved > 0 {
            debug!(queue = %queue, moved, "Promoted delayed jobs");
        }
        Ok(moved)
    }

    async fn heartbeat(&self, job: &Job, token: &str) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let extended: i64 = Script::new(EXTEND_LOCK_SCRIPT)
            .key(self.lock_key(job.queue_name, job.id.as_str()))
            .arg(token)
            .arg(self.config.lock_ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        if extended == 0 {
            warn!(queue = %job.queue_name, job_id = %job.id, "Worker lock lost");
        }
        Ok(extended == 1)
    }

    async fn recover_stalled(&self, queue: QueueName) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let moved: u64 = Script::new(RECOVER_SCRIPT)
            .key(self.state_key(queue, JobState::Active))
            .key(self.state_key(queue, JobState::Waiting))
            .arg(self.lock_key(queue, ""))
            .arg(self.job_key(queue, ""))
            .invoke_async(&mut conn)
            .await?;
        if moved > 0 {
            warn!(queue = %queue, moved, "Recovered stalled jobs");
        }
        Ok(moved)
    }

    async fn get_counts(
        &self,
        queue: QueueName,
        states: &[JobState],
    ) -> QueueResult<HashMap<JobState, u64>> {
        if states.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        for state in states {
            let command = match state {
                JobState::Waiting | JobState::Active => "LLEN",
                JobState::Delayed => "ZCARD",
                JobState::Completed | JobState::Failed => "SCARD",
            };
            pipe.cmd(command).arg(self.state_key(queue, *state));
        }
        let counts: Vec<u64> = pipe.query_async(&mut conn).await?;
        Ok(states.iter().copied().zip(counts).collect())
    }

    async fn has_existing_job(&self, queue: QueueName, file_id: &str) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.file_key(queue, file_id))
            .query_async(&mut conn)
            .await?;

        for id in ids {
            let state: Option<String> = redis::cmd("HGET")
                .arg(self.job_key(queue, &id))
                .arg("state")
                .query_async(&mut conn)
                .await?;
            let pending = state
                .and_then(|s| s.parse::<JobState>().ok())
                .is_some_and(|s| s.is_pending());
            if pending {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn get_job(&self, queue: QueueName, id: &JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.job_key(queue, id.as_str()))
            .query_async(&mut conn)
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        job_from_fields(queue, id, fields).map(Some)
    }
}

/// Rebuild a [`Job`] from its Redis hash.
fn job_from_fields(
    queue: QueueName,
    id: &JobId,
    mut fields: HashMap<String, String>,
) -> QueueResult<Job> {
    let corrupt = |reason: String| QueueError::corrupt(id.as_str(), reason);

    let payload = fields
        .remove("payload")
        .ok_or_else(|| corrupt("missing payload".into()))?;
    let payload: serde_json::Value = serde_json::from_str(&payload)?;

    let state = fields
        .remove("state")
        .unwrap_or_default()
        .parse::<JobState>()
        .map_err(corrupt)?;

    let attempts = fields
        .remove("attempts")
        .map(|s| s.parse::<u32>())
        .transpose()
        .map_err(|e| corrupt(format!("attempts: {e}")))?
        .unwrap_or(0);

    let parse_time = |value: String| -> QueueResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("timestamp: {e}")))
    };
    let created_at = fields
        .remove("createdAt")
        .map(&parse_time)
        .transpose()?
        .unwrap_or_else(Utc::now);
    let finished_at = fields.remove("finishedAt").map(&parse_time).transpose()?;

    let result = fields
        .remove("result")
        .map(|s| serde_json::from_str(&s))
        .transpose()?;

    Ok(Job {
        id: id.clone(),
        queue_name: queue,
        payload,
        state,
        attempts,
        created_at,
        finished_at,
        result,
        error: fields.remove("error"),
    })
}
