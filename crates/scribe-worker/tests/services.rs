//! Speech recognition and LLM marking against mocked HTTP services.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scribe_models::LlmMarkingJob;
use scribe_storage::{MemoryStore, ObjectStore, ScratchConfig, ScratchStorage, StorageGateway};
use scribe_worker::{AsrConfig, AsrHandler, FileCacheConfig, LlmConfig, MarkingHandler, WorkerError};

fn gateway(dir: &tempfile::TempDir, store: Arc<MemoryStore>) -> Arc<StorageGateway> {
    let scratch = ScratchStorage::new(ScratchConfig {
        root: dir.path().to_path_buf(),
        min_free_bytes: 0,
        delete_retry_unit: Duration::from_millis(1),
    });
    Arc::new(StorageGateway::new(store as Arc<dyn ObjectStore>, Arc::new(scratch)))
}

fn asr_config(server: &MockServer) -> AsrConfig {
    let mut config = AsrConfig::new(server.uri(), "asr-key");
    config.poll_interval = Duration::from_millis(5);
    config
}

#[tokio::test]
async fn transcription_polls_until_completed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/transcript"))
        .and(header("authorization", "asr-key"))
        .and(body_partial_json(json!({ "audio_url": "memory://f1.mp3", "speaker_labels": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "t1", "status": "queued" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/transcript/t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "t1", "status": "processing" })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/transcript/t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "t1",
            "status": "completed",
            "text": "Hello there.",
            "words": [{ "text": "Hello", "start": 0, "end": 400, "speaker": "A" }],
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let handler = AsrHandler::new(
        gateway(&dir, Arc::new(MemoryStore::new())),
        reqwest::Client::new(),
        asr_config(&server),
    );

    let result = handler.transcribe("f1").await.unwrap();
    assert_eq!(result["fileId"], "f1");
    assert_eq!(result["transcriptId"], "t1");
    assert_eq!(result["transcript"]["text"], "Hello there.");
}

#[tokio::test]
async fn transcription_error_fails_the_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/transcript"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "t2", "status": "queued" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/transcript/t2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "t2",
            "status": "error",
            "error": "audio too short",
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let handler = AsrHandler::new(
        gateway(&dir, Arc::new(MemoryStore::new())),
        reqwest::Client::new(),
        asr_config(&server),
    );

    let err = handler.transcribe("f2").await.unwrap_err();
    assert!(matches!(err, WorkerError::AsrFailed(ref m) if m == "audio too short"), "{err}");
}

fn marking_handler(
    dir: &tempfile::TempDir,
    store: Arc<MemoryStore>,
    llm: &MockServer,
    cache: &MockServer,
) -> MarkingHandler {
    MarkingHandler::new(
        gateway(dir, store),
        reqwest::Client::new(),
        LlmConfig::new(llm.uri(), "llm-key", "gpt-4o"),
        FileCacheConfig {
            url: cache.uri(),
            api_key: "cache-key".to_string(),
        },
    )
}

#[tokio::test]
async fn marked_transcript_is_saved_to_the_cache() {
    let llm = MockServer::start().await;
    let cache = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer llm-key"))
        .and(body_partial_json(json!({ "model": "gpt-4o", "temperature": 0 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Q. Hello. A. Hi." } }],
        })))
        .expect(1)
        .mount(&llm)
        .await;
    Mock::given(method("POST"))
        .and(path("/save-transcript"))
        .and(header("x-api-key", "cache-key"))
        .and(body_partial_json(json!({
            "fileId": "f1",
            "isCF": true,
            "transcript": "[--PROCEEDINGS--]\n\nQ.  Hello.  A.  Hi.",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&cache)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert("f1.txt", &b"[00:00:01] Q Hello.\n[00:00:03] A Hi."[..]);
    let handler = marking_handler(&dir, store, &llm, &cache);

    let result = handler
        .mark(&LlmMarkingJob {
            order_id: 42,
            file_id: Some("f1".into()),
        })
        .await
        .unwrap();
    assert_eq!(result["orderId"], 42);
    assert_eq!(result["fileId"], "f1");
}

#[tokio::test]
async fn marking_requires_a_transcript() {
    let llm = MockServer::start().await;
    let cache = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&llm)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let handler = marking_handler(&dir, Arc::new(MemoryStore::new()), &llm, &cache);

    let missing_id = handler
        .mark(&LlmMarkingJob {
            order_id: 1,
            file_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(missing_id, WorkerError::InvalidPayload(_)));

    let missing_file = handler
        .mark(&LlmMarkingJob {
            order_id: 1,
            file_id: Some("nope".into()),
        })
        .await;
    assert!(missing_file.is_err());
}
