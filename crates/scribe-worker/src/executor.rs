//! Job executor.
//!
//! Claims one job at a time from the configured queue, runs it through the
//! queue's handler, records the outcome on the job and notifies the
//! application. A background task promotes delayed jobs and returns stalled
//! ones to the queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use scribe_models::{FailureTracker, Job, JobOutput, JobState, QueueName, WebhookPayload};
use scribe_queue::JobQueue;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::handler::JobHandler;
use crate::logging::JobLogger;
use crate::metrics::record_job;
use crate::webhook::WebhookClient;

/// Pause after a failed claim.
const CLAIM_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Shortest period accepted for the heartbeat and maintenance tickers.
const MIN_TICK: Duration = Duration::from_millis(10);

/// Consecutive failures logged before suppression.
const MAX_LOGGED_FAILURES: u32 = 5;

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    webhook: Option<WebhookClient>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        webhook: Option<WebhookClient>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            queue,
            handler,
            webhook,
            shutdown,
            consumer_name: format!("worker-{}", Uuid::new_v4()),
        }
    }

    fn queue_name(&self) -> QueueName {
        self.config.queue
    }

    /// Start the executor. Returns after [`shutdown`](Self::shutdown) once
    /// the in-flight job, if any, has finished.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' on queue {}",
            self.consumer_name,
            self.queue_name()
        );

        let maintenance = self.spawn_maintenance();
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut claims = FailureTracker::new(MAX_LOGGED_FAILURES);

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, stopping executor");
                break;
            }

            let pause = match self.run_once().await {
                Ok(true) => {
                    claims.record_success();
                    continue;
                }
                Ok(false) => {
                    claims.record_success();
                    self.config.poll_interval
                }
                Err(e) => {
                    if claims.record_failure() {
                        error!("Failed to claim job: {}", e);
                    }
                    CLAIM_ERROR_BACKOFF
                }
            };

            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }

        maintenance.abort();
        info!("Job executor stopped");
        Ok(())
    }

    /// Claim and process at most one job. Returns whether a job was processed.
    pub async fn run_once(&self) -> WorkerResult<bool> {
        match self.queue.claim(self.queue_name(), &self.consumer_name).await? {
            Some(job) => {
                self.execute(job).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn execute(&self, job: Job) {
        let logger = JobLogger::new(&job.id, job.queue_name, job.file_id());
        let span = logger.create_span();
        logger.log_start(&format!("attempt {}", job.attempts));
        let started = Instant::now();

        let lock_lost = Arc::new(AtomicBool::new(false));
        let heartbeat = self.spawn_heartbeat(job.clone(), Arc::clone(&lock_lost));
        let result = self.handler.handle(&job).instrument(span).await;
        heartbeat.abort();

        let elapsed = started.elapsed().as_secs_f64();
        if lock_lost.load(Ordering::SeqCst) {
            logger.log_warning("worker lock lost, outcome discarded");
            record_job(job.queue_name.as_str(), "lost", elapsed);
            return;
        }
        match result {
            Ok(value) => {
                let stored = serde_json::to_value(JobOutput::completed(value.clone()))
                    .unwrap_or_else(|_| value.clone());
                if let Err(e) = self.queue.complete(&job, stored).await {
                    logger.log_error(&format!("Failed to record completion: {e}"));
                }
                logger.log_completion(&format!("in {elapsed:.1}s"));
                record_job(job.queue_name.as_str(), "completed", elapsed);

                let payload = WebhookPayload::completed(
                    job.id.clone(),
                    job.file_id().map(str::to_string),
                    value,
                );
                self.notify(job.queue_name, &payload).await;
            }
            Err(e) => {
                let message = e.to_string();
                logger.log_error(&format!("{message} (retryable: {})", e.is_retryable()));

                let state = match self.queue.fail(&job, &message).await {
                    Ok(state) => state,
                    Err(qe) => {
                        logger.log_error(&format!("Failed to record failure: {qe}"));
                        JobState::Failed
                    }
                };
                record_job(job.queue_name.as_str(), state.as_str(), elapsed);

                if state == JobState::Failed {
                    let payload = WebhookPayload::failed(
                        job.id.clone(),
                        job.file_id().map(str::to_string),
                        message,
                    );
                    self.notify(job.queue_name, &payload).await;
                } else {
                    logger.log_warning(&format!("will be retried ({state})"));
                }
            }
        }
    }

    async fn notify(&self, queue: QueueName, payload: &WebhookPayload) {
        match &self.webhook {
            // Delivery failures are logged by the client and never fail the job.
            Some(client) => {
                let _ = client.send(queue, payload).await;
            }
            None => debug!(job_id = %payload.job_id, "Webhooks disabled, skipping callback"),
        }
    }

    fn spawn_heartbeat(&self, job: Job, lost: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let token = self.consumer_name.clone();
        let interval = self.config.heartbeat_interval.max(MIN_TICK);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            let mut failures = FailureTracker::new(MAX_LOGGED_FAILURES);
            loop {
                ticker.tick().await;
                match queue.heartbeat(&job, &token).await {
                    Ok(true) => failures.record_success(),
                    Ok(false) => {
                        warn!(job_id = %job.id, "Worker lock lost, another worker may own the job");
                        lost.store(true, Ordering::SeqCst);
                        break;
                    }
                    Err(e) => {
                        if failures.record_failure() {
                            warn!(job_id = %job.id, "Heartbeat failed: {}", e);
                        }
                    }
                }
            }
        })
    }

    fn spawn_maintenance(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let name = self.queue_name();
        let interval = self.config.maintenance_interval.max(MIN_TICK);
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut failures = FailureTracker::new(MAX_LOGGED_FAILURES);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let promoted = queue.promote_delayed(name).await;
                        let recovered = queue.recover_stalled(name).await;
                        match (promoted, recovered) {
                            (Ok(promoted), Ok(recovered)) => {
                                failures.record_success();
                                if promoted > 0 || recovered > 0 {
                                    info!(queue = %name, promoted, recovered, "Queue maintenance");
                                }
                            }
                            (Err(e), _) | (_, Err(e)) => {
                                if failures.record_failure() {
                                    warn!(queue = %name, "Queue maintenance failed: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        })
    }
}
