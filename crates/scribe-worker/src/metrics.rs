//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_PROCESSED_TOTAL: &str = "scribe_jobs_processed_total";
    pub const JOB_DURATION_SECONDS: &str = "scribe_job_duration_seconds";
    pub const CONVERSIONS_TOTAL: &str = "scribe_conversions_total";
    pub const WEBHOOKS_TOTAL: &str = "scribe_webhooks_total";
    pub const DESIRED_WORKERS: &str = "scribe_desired_workers";
}

/// Serve `/metrics` on `port`.
pub fn install_exporter(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {e}")))?;
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

/// Record a processed job and how long it took.
pub fn record_job(queue: &str, outcome: &str, duration_secs: f64) {
    let labels = [("queue", queue.to_string()), ("outcome", outcome.to_string())];
    counter!(names::JOBS_PROCESSED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record the terminal status of a conversion.
pub fn record_conversion(status: &str) {
    counter!(names::CONVERSIONS_TOTAL, "status" => status.to_string()).increment(1);
}

/// Record a webhook delivery attempt.
pub fn record_webhook(queue: &str, delivered: bool) {
    let labels = [
        ("queue", queue.to_string()),
        ("delivered", delivered.to_string()),
    ];
    counter!(names::WEBHOOKS_TOTAL, &labels).increment(1);
}

pub fn set_desired_workers(count: u64) {
    gauge!(names::DESIRED_WORKERS).set(count as f64);
}
