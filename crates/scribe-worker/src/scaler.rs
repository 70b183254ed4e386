//! Queue-driven autoscaling of the worker service.
//!
//! Each cycle reads the backlog (`waiting + active`), derives the desired
//! instance count and asks the hosting API to scale only when the current
//! count differs. Runs are serialized across processes by a Redis lock.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use scribe_models::JobState;
use scribe_queue::JobQueue;

use crate::config::ScalerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics::set_desired_workers;

/// Releases the lock only when it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Instance count for a backlog of `total` jobs.
pub fn desired_workers(total: u64, config: &ScalerConfig) -> u64 {
    let per_worker = config.jobs_per_worker.max(1);
    total
        .div_ceil(per_worker)
        .clamp(config.min_workers, config.max_workers)
}

/// Outcome of one scaling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Another run holds the lock.
    Skipped,
    /// Current count already matches.
    Unchanged { workers: u64 },
    Scaled { from: u64, to: u64 },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceResponse {
    num_instances: Option<u64>,
    service_details: Option<ServiceDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceDetails {
    num_instances: Option<u64>,
}

/// Client for the hosting provider's service API.
#[derive(Clone)]
pub struct RenderClient {
    http: Client,
    api_url: String,
    api_key: String,
    service_id: String,
}

impl RenderClient {
    pub fn new(http: Client, config: &ScalerConfig) -> Self {
        Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            service_id: config.service_id.clone(),
        }
    }

    fn service_url(&self) -> String {
        format!("{}/services/{}", self.api_url, self.service_id)
    }

    /// Current instance count. Services that report none run one instance.
    pub async fn get_instances(&self) -> WorkerResult<u64> {
        let response = self
            .http
            .get(self.service_url())
            .bearer_auth(&self.api_key)
            .header("accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::scaling_failed(format!(
                "GET service returned {status}"
            )));
        }

        let body: ServiceResponse = response.json().await?;
        Ok(body
            .num_instances
            .or_else(|| body.service_details.and_then(|d| d.num_instances))
            .unwrap_or(1))
    }

    /// Request `instances` running instances.
    pub async fn scale(&self, instances: u64) -> WorkerResult<()> {
        let response = self
            .http
            .post(format!("{}/scale", self.service_url()))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "numInstances": instances }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::scaling_failed(format!(
                "scale to {instances} returned {status}: {body}"
            )));
        }
        Ok(())
    }
}

/// Cross-process lock held for the duration of one cycle.
pub struct ScalerLock {
    client: redis::Client,
    key: String,
    ttl: Duration,
}

impl ScalerLock {
    pub fn new(client: redis::Client, prefix: &str, ttl: Duration) -> Self {
        Self {
            client,
            key: format!("{prefix}:scaler:lock"),
            ttl,
        }
    }

    async fn connection(&self) -> WorkerResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| WorkerError::scaling_failed(format!("redis: {e}")))
    }

    /// Try to take the lock. Returns the owner token on success.
    async fn acquire(&self) -> WorkerResult<Option<String>> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| WorkerError::scaling_failed(format!("lock: {e}")))?;
        Ok(reply.map(|_| token))
    }

    async fn release(&self, token: &str) {
        let result: WorkerResult<i64> = async {
            let mut conn = self.connection().await?;
            redis::Script::new(RELEASE_SCRIPT)
                .key(&self.key)
                .arg(token)
                .invoke_async::<i64>(&mut conn)
                .await
                .map_err(|e| WorkerError::scaling_failed(format!("unlock: {e}")))
        }
        .await;

        if let Err(e) = result {
            warn!("Failed to release scaler lock (expires on its own): {}", e);
        }
    }
}

/// Scales the worker service to the queue backlog.
pub struct ScalingController {
    config: ScalerConfig,
    queue: Arc<dyn JobQueue>,
    infra: RenderClient,
    lock: Option<ScalerLock>,
}

impl ScalingController {
    pub fn new(
        config: ScalerConfig,
        queue: Arc<dyn JobQueue>,
        infra: RenderClient,
        lock: Option<ScalerLock>,
    ) -> Self {
        Self {
            config,
            queue,
            infra,
            lock,
        }
    }

    pub fn config(&self) -> &ScalerConfig {
        &self.config
    }

    /// Run a single scaling cycle under the lock.
    pub async fn run_once(&self) -> WorkerResult<ScaleDecision> {
        let token = match &self.lock {
            Some(lock) => match lock.acquire().await? {
                Some(token) => Some(token),
                None => {
                    info!("Another scaling run holds the lock, skipping");
                    return Ok(ScaleDecision::Skipped);
                }
            },
            None => None,
        };

        let result = self.cycle().await;

        if let (Some(lock), Some(token)) = (&self.lock, token) {
            lock.release(&token).await;
        }
        result
    }

    async fn cycle(&self) -> WorkerResult<ScaleDecision> {
        let counts = self
            .queue
            .get_counts(self.config.queue, &[JobState::Waiting, JobState::Active])
            .await?;
        let waiting = counts.get(&JobState::Waiting).copied().unwrap_or(0);
        let active = counts.get(&JobState::Active).copied().unwrap_or(0);
        let desired = desired_workers(waiting + active, &self.config);
        set_desired_workers(desired);

        let current = self.infra.get_instances().await?;
        info!(
            queue = %self.config.queue,
            waiting,
            active,
            current,
            desired,
            "Scaling check"
        );

        if current == desired {
            debug!("Worker count already at {}", desired);
            return Ok(ScaleDecision::Unchanged { workers: current });
        }

        self.infra.scale(desired).await?;
        info!("Scaled workers from {} to {}", current, desired);
        Ok(ScaleDecision::Scaled {
            from: current,
            to: desired,
        })
    }

    /// Run cycles every configured interval until the future is dropped.
    pub async fn run_loop(&self) {
        let mut ticker = tokio::time::interval(self.config.interval.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                warn!("Scaling cycle failed: {}", e);
            }
        }
    }
}
