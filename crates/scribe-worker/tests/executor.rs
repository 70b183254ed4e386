//! Executor tests: job state transitions and webhook callbacks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scribe_models::{Job, JobState, QueueName};
use scribe_queue::{JobQueue, MemoryQueue};
use scribe_worker::{
    JobExecutor, JobHandler, WebhookClient, WebhookConfig, WorkerConfig, WorkerError, WorkerResult,
};

const Q: QueueName = QueueName::AudioVideoConversion;

/// Succeeds unless the payload asks it to fail, after an optional sleep.
struct ScriptedHandler;

#[async_trait]
impl JobHandler for ScriptedHandler {
    fn queue(&self) -> QueueName {
        Q
    }

    async fn handle(&self, job: &Job) -> WorkerResult<serde_json::Value> {
        if let Some(ms) = job.payload.get("sleepMs").and_then(|v| v.as_u64()) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        match job.payload.get("fail").and_then(|v| v.as_str()) {
            Some(reason) => Err(WorkerError::job_failed(reason)),
            None => Ok(json!({ "status": "SUCCESS", "fileId": job.file_id() })),
        }
    }
}

fn executor(queue: Arc<MemoryQueue>, webhook: Option<WebhookClient>) -> JobExecutor {
    let config = WorkerConfig {
        poll_interval: Duration::from_millis(10),
        maintenance_interval: Duration::from_millis(10),
        ..WorkerConfig::default()
    };
    JobExecutor::new(config, queue, Arc::new(ScriptedHandler), webhook)
}

fn webhook(server: &MockServer) -> WebhookClient {
    WebhookClient::new(WebhookConfig::new(server.uri(), "webhook-secret")).unwrap()
}

#[tokio::test]
async fn completed_job_is_recorded_and_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/webhook/conversion-worker"))
        .and(header_exists("authorization"))
        .and(body_partial_json(json!({ "status": "completed", "fileId": "f1" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let queue = Arc::new(MemoryQueue::new(1, Duration::from_secs(1), Duration::from_secs(60)));
    let id = queue.enqueue(Q, json!({ "fileKey": "a.wav", "fileId": "f1" })).await.unwrap();

    let executor = executor(queue.clone(), Some(webhook(&server)));
    assert!(executor.run_once().await.unwrap());
    assert!(!executor.run_once().await.unwrap());

    let job = queue.get_job(Q, &id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    let result = job.result.unwrap();
    assert_eq!(result["status"], "completed");
    assert_eq!(result["result"]["fileId"], "f1");
}

#[tokio::test]
async fn exhausted_job_fails_and_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/webhook/conversion-worker"))
        .and(body_partial_json(json!({ "status": "failed", "error": "Job failed: boom" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let queue = Arc::new(MemoryQueue::new(1, Duration::from_secs(1), Duration::from_secs(60)));
    let id = queue.enqueue(Q, json!({ "fileKey": "a.wav", "fail": "boom" })).await.unwrap();

    let executor = executor(queue.clone(), Some(webhook(&server)));
    assert!(executor.run_once().await.unwrap());

    let job = queue.get_job(Q, &id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.as_deref(), Some("Job failed: boom"));
}

#[tokio::test]
async fn failure_with_attempts_left_is_delayed_without_callback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let queue = Arc::new(MemoryQueue::new(3, Duration::from_secs(60), Duration::from_secs(60)));
    let id = queue.enqueue(Q, json!({ "fileKey": "a.wav", "fail": "flaky" })).await.unwrap();

    let executor = executor(queue.clone(), Some(webhook(&server)));
    assert!(executor.run_once().await.unwrap());

    let job = queue.get_job(Q, &id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Delayed);
}

#[tokio::test]
async fn webhook_outage_does_not_change_job_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let queue = Arc::new(MemoryQueue::new(1, Duration::from_secs(1), Duration::from_secs(60)));
    let id = queue.enqueue(Q, json!({ "fileKey": "a.wav" })).await.unwrap();

    let executor = executor(queue.clone(), Some(webhook(&server)));
    assert!(executor.run_once().await.unwrap());

    let job = queue.get_job(Q, &id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
}

#[tokio::test]
async fn run_drains_the_queue_and_stops_on_shutdown() {
    let queue = Arc::new(MemoryQueue::new(1, Duration::from_secs(1), Duration::from_secs(60)));
    for i in 0..3 {
        queue.enqueue(Q, json!({ "fileKey": format!("{i}.wav") })).await.unwrap();
    }

    let executor = Arc::new(executor(queue.clone(), None));
    let runner = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.run().await })
    };

    let mut completed = 0;
    for _ in 0..200 {
        let counts = queue.get_counts(Q, &[JobState::Completed]).await.unwrap();
        completed = counts.get(&JobState::Completed).copied().unwrap_or(0);
        if completed == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(completed, 3);

    executor.shutdown();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("executor did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn zero_heartbeat_interval_still_keeps_the_lock() {
    let queue = Arc::new(MemoryQueue::new(1, Duration::from_secs(1), Duration::from_millis(50)));
    let id = queue.enqueue(Q, json!({ "fileKey": "a.wav", "sleepMs": 300 })).await.unwrap();

    let config = WorkerConfig {
        heartbeat_interval: Duration::ZERO,
        ..WorkerConfig::default()
    };
    let executor = JobExecutor::new(config, queue.clone(), Arc::new(ScriptedHandler), None);

    let sweeper = {
        let queue = queue.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            queue.recover_stalled(Q).await.unwrap()
        }
    };
    let (processed, recovered) = tokio::join!(executor.run_once(), sweeper);

    assert!(processed.unwrap());
    assert_eq!(recovered, 0);
    let job = queue.get_job(Q, &id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
}

#[tokio::test(start_paused = true)]
async fn outcome_is_discarded_after_another_worker_takes_the_job() {
    let queue = Arc::new(MemoryQueue::new(3, Duration::from_secs(1), Duration::from_millis(50)));
    let id = queue.enqueue(Q, json!({ "fileKey": "a.wav", "sleepMs": 300 })).await.unwrap();

    let config = WorkerConfig {
        heartbeat_interval: Duration::from_millis(200),
        ..WorkerConfig::default()
    };
    let executor = JobExecutor::new(config, queue.clone(), Arc::new(ScriptedHandler), None);

    let rival = {
        let queue = queue.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(queue.recover_stalled(Q).await.unwrap(), 1);
            queue.claim(Q, "rival-worker").await.unwrap()
        }
    };
    let (processed, reclaimed) = tokio::join!(executor.run_once(), rival);

    assert!(processed.unwrap());
    let reclaimed = reclaimed.expect("job was not reclaimed");
    assert_eq!(reclaimed.id, id);

    let job = queue.get_job(Q, &id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Active);
    assert_eq!(job.attempts, 2);
    assert!(job.result.is_none());
}
