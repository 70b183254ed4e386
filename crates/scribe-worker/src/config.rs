//! Worker configuration.

use std::str::FromStr;
use std::time::Duration;

use scribe_models::QueueName;

use crate::error::{WorkerError, WorkerResult};

fn env_parse<T: FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Whole seconds from `var`; zero and unparsable values fall back to `default`.
fn env_secs(var: &str, default: u64) -> Duration {
    let secs = std::env::var(var)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_required(var: &str) -> WorkerResult<String> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(WorkerError::config_error(format!("{var} must be set"))),
    }
}

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue served by this process
    pub queue: QueueName,
    /// Sleep between claims when the queue is empty
    pub poll_interval: Duration,
    /// Interval for extending the lock on the active job
    pub heartbeat_interval: Duration,
    /// Interval for promoting delayed jobs and recovering stalled ones
    pub maintenance_interval: Duration,
    /// How long shutdown waits for the in-flight job
    pub shutdown_timeout: Duration,
    /// Port for the Prometheus exporter, when enabled
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: QueueName::AudioVideoConversion,
            poll_interval: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_secs(20),
            maintenance_interval: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(300),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();
        let queue = match std::env::var("WORKER_QUEUE") {
            Ok(name) => name.parse().map_err(WorkerError::config_error)?,
            Err(_) => defaults.queue,
        };

        Ok(Self {
            queue,
            poll_interval: Duration::from_millis(env_parse("WORKER_POLL_INTERVAL_MS", 1000)),
            heartbeat_interval: env_secs("WORKER_HEARTBEAT_SECS", 20),
            maintenance_interval: env_secs("WORKER_MAINTENANCE_SECS", 15),
            shutdown_timeout: Duration::from_secs(env_parse("WORKER_SHUTDOWN_TIMEOUT", 300)),
            metrics_port: std::env::var("METRICS_PORT").ok().and_then(|p| p.parse().ok()),
        })
    }
}

/// Application callback settings.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Base URL of the application, e.g. `https://app.example.com`
    pub app_base_url: String,
    /// HS256 signing secret
    pub secret: String,
    /// Lifetime of each bearer token
    pub token_ttl: Duration,
    /// Request timeout
    pub timeout: Duration,
}

impl WebhookConfig {
    pub fn new(app_base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            app_base_url: app_base_url.into(),
            secret: secret.into(),
            token_ttl: Duration::from_secs(5 * 60),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_env() -> WorkerResult<Self> {
        Ok(Self::new(
            env_required("APP_BASE_URL")?,
            env_required("WEBHOOK_SECRET")?,
        ))
    }
}

/// Scaling controller settings.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    /// Infrastructure API root, e.g. `https://api.render.com/v1`
    pub api_url: String,
    pub api_key: String,
    /// Service whose instance count is managed
    pub service_id: String,
    /// Queue whose backlog drives the instance count
    pub queue: QueueName,
    pub jobs_per_worker: u64,
    pub min_workers: u64,
    pub max_workers: u64,
    /// Interval between cycles in loop mode
    pub interval: Duration,
    /// TTL of the lock serializing overlapping runs
    pub lock_ttl: Duration,
    /// Wall-clock limit of a one-shot run
    pub run_timeout: Duration,
}

impl ScalerConfig {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            service_id: service_id.into(),
            queue: QueueName::AudioVideoConversion,
            jobs_per_worker: 2,
            min_workers: 1,
            max_workers: 5,
            interval: Duration::from_secs(60),
            lock_ttl: Duration::from_secs(170),
            run_timeout: Duration::from_secs(180),
        }
    }

    pub fn from_env() -> WorkerResult<Self> {
        let mut config = Self::new(
            env_or("RENDER_API_URL", "https://api.render.com/v1"),
            env_required("RENDER_API_KEY")?,
            env_required("RENDER_SERVICE_ID")?,
        );
        if let Ok(name) = std::env::var("WORKER_QUEUE") {
            config.queue = name.parse().map_err(WorkerError::config_error)?;
        }
        config.jobs_per_worker = env_parse("SCALER_JOBS_PER_WORKER", config.jobs_per_worker).max(1);
        config.min_workers = env_parse("SCALER_MIN_WORKERS", config.min_workers);
        config.max_workers = env_parse("SCALER_MAX_WORKERS", config.max_workers).max(config.min_workers);
        config.interval = env_secs("SCALER_INTERVAL_SECS", 60);
        Ok(config)
    }
}

/// External speech recognition service.
#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub api_url: String,
    pub api_key: String,
    /// Delay between status polls
    pub poll_interval: Duration,
    /// Give up when the transcript is not ready after this long
    pub max_wait: Duration,
    /// Lifetime of the presigned audio URL
    pub url_expiry: Duration,
}

impl AsrConfig {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            poll_interval: Duration::from_secs(3),
            max_wait: Duration::from_secs(2 * 60 * 60),
            url_expiry: Duration::from_secs(60 * 60),
        }
    }

    pub fn from_env() -> WorkerResult<Self> {
        let mut config = Self::new(
            env_or("ASR_API_URL", "https://api.assemblyai.com"),
            env_required("ASR_API_KEY")?,
        );
        config.poll_interval = Duration::from_secs(env_parse("ASR_POLL_INTERVAL_SECS", 3));
        Ok(config)
    }
}

/// OpenAI-compatible chat completion endpoint used for transcript marking.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    /// Maximum characters sent per request
    pub part_length: usize,
}

impl LlmConfig {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            part_length: 8000,
        }
    }

    pub fn from_env() -> WorkerResult<Self> {
        let mut config = Self::new(
            env_or("LLM_API_URL", "https://api.openai.com/v1"),
            env_required("LLM_API_KEY")?,
            env_or("LLM_MODEL", "gpt-4o"),
        );
        config.part_length = env_parse("LLM_PART_LENGTH", config.part_length).max(1);
        Ok(config)
    }
}

/// Transcript cache service receiving marked transcripts.
#[derive(Debug, Clone)]
pub struct FileCacheConfig {
    pub url: String,
    pub api_key: String,
}

impl FileCacheConfig {
    pub fn from_env() -> WorkerResult<Self> {
        Ok(Self {
            url: env_required("FILE_CACHE_URL")?,
            api_key: env_required("FILE_CACHE_API_KEY")?,
        })
    }
}
