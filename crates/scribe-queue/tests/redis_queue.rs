//! Redis queue integration tests.

use std::time::Duration;

use scribe_models::{JobState, QueueName};
use scribe_queue::{JobQueue, QueueConfig, RedisQueue};
use serde_json::json;

fn test_queue() -> RedisQueue {
    dotenvy::dotenv().ok();
    let config = QueueConfig {
        prefix: format!("scribe-test-{}", std::process::id()),
        lock_ttl: Duration::from_millis(200),
        ..QueueConfig::from_env()
    };
    RedisQueue::new(config).expect("Failed to create queue")
}

/// Test Redis connection.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    let queue = test_queue();
    queue.ping().await.expect("Failed to ping Redis");
}

/// Test enqueue, claim and complete cycle.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_job_lifecycle() {
    let queue = test_queue();
    let q = QueueName::AudioVideoConversion;

    let id = queue
        .enqueue(q, json!({ "fileKey": "abc.wav", "fileId": "abc" }))
        .await
        .expect("Failed to enqueue");
    assert!(queue.has_existing_job(q, "abc").await.unwrap());

    let job = queue.claim(q, "test-worker").await.unwrap().expect("No job claimed");
    assert_eq!(job.id, id);
    assert_eq!(job.state, JobState::Active);
    assert_eq!(job.attempts, 1);
    assert!(queue.claim(q, "test-worker").await.unwrap().is_none());

    queue
        .complete(&job, json!({ "status": "completed" }))
        .await
        .expect("Failed to complete");

    let stored = queue.get_job(q, &id).await.unwrap().expect("Job not retained");
    assert_eq!(stored.state, JobState::Completed);
    assert!(!queue.has_existing_job(q, "abc").await.unwrap());

    let counts = queue
        .get_counts(q, &[JobState::Waiting, JobState::Active, JobState::Completed])
        .await
        .unwrap();
    assert_eq!(counts[&JobState::Waiting], 0);
    assert_eq!(counts[&JobState::Active], 0);
    assert_eq!(counts[&JobState::Completed], 1);
}

/// Test that an expired worker lock sends the job back to waiting.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_stalled_recovery() {
    let queue = test_queue();
    let q = QueueName::AutomaticSpeechRecognition;

    queue.enqueue(q, json!({ "fileId": "s1" })).await.unwrap();
    let job = queue.claim(q, "test-worker").await.unwrap().expect("No job claimed");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(queue.recover_stalled(q).await.unwrap(), 1);

    let again = queue.claim(q, "other-worker").await.unwrap().expect("Job not recovered");
    assert_eq!(again.id, job.id);
    assert_eq!(again.attempts, 2);

    assert!(!queue.heartbeat(&job, "test-worker").await.unwrap());
    assert!(queue.heartbeat(&again, "other-worker").await.unwrap());
}
