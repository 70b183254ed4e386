//! YouTube ingestion against a scripted downloader.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use scribe_models::{ProcessStatus, YoutubeIngestJob};
use scribe_storage::{
    GatewayConfig, MemoryStore, MultipartConfig, ObjectStore, ScratchConfig, ScratchStorage,
    StorageGateway,
};
use scribe_worker::YoutubeHandler;

fn downloader(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn gateway(dir: &tempfile::TempDir, store: Arc<MemoryStore>) -> Arc<StorageGateway> {
    let scratch = ScratchStorage::new(ScratchConfig {
        root: dir.path().join("scratch"),
        min_free_bytes: 0,
        delete_retry_unit: Duration::from_millis(1),
    });
    let config = GatewayConfig {
        multipart: MultipartConfig {
            part_size: 4,
            concurrency: 2,
            part_attempts: 2,
            retry_unit: Duration::from_millis(1),
        },
        ..GatewayConfig::default()
    };
    Arc::new(StorageGateway::with_config(
        store as Arc<dyn ObjectStore>,
        Arc::new(scratch),
        config,
    ))
}

fn job() -> YoutubeIngestJob {
    YoutubeIngestJob {
        user_id: "7".into(),
        file_id: "yt-1".into(),
        youtube_url: "https://www.youtube.com/watch?v=abc".into(),
        file_key: "yt-1.mp4".into(),
    }
}

#[tokio::test]
async fn download_is_streamed_into_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let ytdlp = downloader(&dir, "yt-ok", "printf 'aaaabbbbcc'");

    let handler = YoutubeHandler::new(gateway(&dir, store.clone()), ytdlp);
    let result = handler.ingest(&job()).await;

    assert_eq!(result.status, ProcessStatus::Success, "{:?}", result.error);
    assert_eq!(result.file_size, Some(10));
    assert_eq!(result.user_id, "7");
    assert_eq!(store.object("yt-1.mp4").unwrap().as_ref(), b"aaaabbbbcc");
    assert_eq!(store.completions()[0].1, vec![1, 2, 3]);
}

#[tokio::test]
async fn downloader_failure_aborts_the_upload() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let ytdlp = downloader(
        &dir,
        "yt-fail",
        "printf 'aaaabbbb'; echo 'ERROR: [youtube] abc: Video unavailable' >&2; exit 1",
    );

    let handler = YoutubeHandler::new(gateway(&dir, store.clone()), ytdlp);
    let result = handler.ingest(&job()).await;

    assert_eq!(result.status, ProcessStatus::Error);
    assert_eq!(result.file_size, None);
    assert!(!store.contains("yt-1.mp4"));
    assert!(store.completions().is_empty());
    assert_eq!(store.aborts(), store.created_uploads());
}

#[tokio::test]
async fn missing_downloader_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());

    let handler = YoutubeHandler::new(
        gateway(&dir, store.clone()),
        dir.path().join("no-such-yt-dlp"),
    );
    let result = handler.ingest(&job()).await;

    assert_eq!(result.status, ProcessStatus::Error);
    assert!(store.created_uploads().is_empty());
}
