//! Conversion pipeline tests with scripted media tools and the in-memory store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use scribe_media::{EncoderFailure, MediaError, MediaInfo, MediaResult, MediaTools, TargetFormat};
use scribe_models::{ConversionJob, ProcessStatus};
use scribe_storage::{
    GatewayConfig, MemoryStore, MultipartConfig, ObjectStore, ScratchConfig, ScratchStorage,
    StorageGateway,
};
use scribe_worker::ConversionHandler;

/// Media tools that write placeholder outputs and fail on demand.
#[derive(Default)]
struct FakeTools {
    /// Targets that fail with a permanent encoder error.
    broken: Vec<TargetFormat>,
    /// Remaining transient failures per target.
    transient: Mutex<HashMap<TargetFormat, u32>>,
    waveform_fails: bool,
    encodes: Mutex<HashMap<TargetFormat, u32>>,
}

impl FakeTools {
    fn broken(target: TargetFormat) -> Self {
        Self {
            broken: vec![target],
            ..Default::default()
        }
    }

    fn flaky(target: TargetFormat, failures: u32) -> Self {
        let tools = Self::default();
        tools.transient.lock().unwrap().insert(target, failures);
        tools
    }

    fn encodes(&self, target: TargetFormat) -> u32 {
        self.encodes.lock().unwrap().get(&target).copied().unwrap_or(0)
    }
}

#[async_trait]
impl MediaTools for FakeTools {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Ok(match ext {
            "mp3" => MediaInfo {
                duration: Some(42.5),
                audio_codec: Some("mp3".into()),
                channels: Some(2),
                ..Default::default()
            },
            "mov" | "mp4" => MediaInfo {
                duration: Some(42.5),
                video_codec: Some("prores".into()),
                audio_codec: Some("pcm_s16le".into()),
                channels: Some(2),
            },
            _ => MediaInfo {
                duration: Some(42.5),
                audio_codec: Some("pcm_s16le".into()),
                channels: Some(1),
                ..Default::default()
            },
        })
    }

    async fn encode(
        &self,
        target: TargetFormat,
        _input: &Path,
        output: &Path,
        _info: &MediaInfo,
    ) -> MediaResult<()> {
        *self.encodes.lock().unwrap().entry(target).or_default() += 1;

        if self.broken.contains(&target) {
            return Err(MediaError::Encoder(
                EncoderFailure::new("ffmpeg")
                    .with_exit_code(1)
                    .with_stderr("input: Invalid data found when processing input"),
            ));
        }
        {
            let mut transient = self.transient.lock().unwrap();
            if let Some(left) = transient.get_mut(&target) {
                if *left > 0 {
                    *left -= 1;
                    return Err(MediaError::Encoder(
                        EncoderFailure::new("ffmpeg").with_exit_code(7),
                    ));
                }
            }
        }

        tokio::fs::write(output, format!("{target} bytes")).await?;
        Ok(())
    }

    async fn waveform(&self, _audio: &Path, wav: &Path, png: &Path) -> MediaResult<()> {
        if self.waveform_fails {
            return Err(MediaError::tool_not_found("audiowaveform"));
        }
        tokio::fs::write(wav, b"RIFF").await?;
        tokio::fs::write(png, b"\x89PNG").await?;
        Ok(())
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    store: Arc<MemoryStore>,
    tools: Arc<FakeTools>,
    handler: ConversionHandler,
}

fn fixture(tools: FakeTools) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let tools = Arc::new(tools);

    let scratch = ScratchStorage::new(ScratchConfig {
        root: dir.path().to_path_buf(),
        min_free_bytes: 0,
        delete_retry_unit: Duration::from_millis(1),
    });
    let config = GatewayConfig {
        single_part_attempts: 2,
        retry_unit: Duration::from_millis(1),
        multipart: MultipartConfig {
            retry_unit: Duration::from_millis(1),
            ..MultipartConfig::default()
        },
        ..GatewayConfig::default()
    };
    let gateway = StorageGateway::with_config(
        store.clone() as Arc<dyn ObjectStore>,
        Arc::new(scratch),
        config,
    );
    let handler = ConversionHandler::new(Arc::new(gateway), tools.clone())
        .with_retry_delay(Duration::from_millis(1));

    Fixture {
        dir,
        store,
        tools,
        handler,
    }
}

fn job(key: &str) -> ConversionJob {
    ConversionJob::new(key).with_user("user-1", "file-1")
}

fn scratch_is_empty(dir: &tempfile::TempDir) -> bool {
    std::fs::read_dir(dir.path()).unwrap().next().is_none()
}

#[tokio::test]
async fn audio_source_produces_mp3_and_waveform() {
    let f = fixture(FakeTools::default());
    f.store.insert("abc.wav", &b"RIFF...."[..]);

    let result = f.handler.convert(&job("abc.wav")).await;

    assert_eq!(result.status, ProcessStatus::Success, "{:?}", result.error);
    assert_eq!(result.duration, Some(42.5));
    assert_eq!(result.file_id, "file-1");
    assert_eq!(result.user_id.as_deref(), Some("user-1"));
    assert!(f.store.contains("abc.mp3"));
    assert!(f.store.contains("file-1_wf.png"));
    assert!(!f.store.contains("abc.wav"));
    assert_eq!(f.tools.encodes(TargetFormat::Mp4), 0);
    assert!(scratch_is_empty(&f.dir));
}

#[tokio::test]
async fn video_source_produces_mp3_and_mp4() {
    let f = fixture(FakeTools::default());
    f.store.insert("clips/talk.mov", &b"moov"[..]);

    let result = f.handler.convert(&job("clips/talk.mov")).await;

    assert_eq!(result.status, ProcessStatus::Success, "{:?}", result.error);
    assert_eq!(
        f.store.keys(),
        vec!["clips/talk.mp3", "clips/talk.mp4", "file-1_wf.png"]
    );
    assert!(scratch_is_empty(&f.dir));
}

#[tokio::test]
async fn mp4_source_is_kept_and_only_audio_is_derived() {
    let f = fixture(FakeTools::default());
    f.store.insert("talk.mp4", &b"ftyp"[..]);

    let result = f.handler.convert(&job("talk.mp4")).await;

    assert_eq!(result.status, ProcessStatus::Success, "{:?}", result.error);
    assert!(f.store.contains("talk.mp4"));
    assert!(f.store.contains("talk.mp3"));
    assert_eq!(f.tools.encodes(TargetFormat::Mp4), 0);
    assert!(!f.store.deletes().contains(&"talk.mp4".to_string()));
}

#[tokio::test]
async fn mp3_source_needs_no_work() {
    let f = fixture(FakeTools::default());
    f.store.insert("song.mp3", &b"ID3"[..]);

    let result = f.handler.convert(&job("song.mp3")).await;

    assert_eq!(result.status, ProcessStatus::Success);
    assert_eq!(result.duration, None);
    assert_eq!(f.store.keys(), vec!["song.mp3"]);
    assert_eq!(f.tools.encodes(TargetFormat::Mp3), 0);
}

#[tokio::test]
async fn permanent_mp4_failure_rolls_back_uploaded_derivatives() {
    let f = fixture(FakeTools::broken(TargetFormat::Mp4));
    f.store.insert("talk.mov", &b"moov"[..]);

    let result = f.handler.convert(&job("talk.mov")).await;

    assert_eq!(result.status, ProcessStatus::Error);
    let message = result.error.unwrap_or_default();
    assert!(message.contains("MP4 conversion failed"), "{message}");
    assert!(message.contains("Invalid data found"), "{message}");
    assert_eq!(f.tools.encodes(TargetFormat::Mp4), 1);

    // The original survives; nothing derived is left behind.
    assert_eq!(f.store.keys(), vec!["talk.mov"]);
    assert!(scratch_is_empty(&f.dir));
}

#[tokio::test]
async fn transient_encoder_failures_are_retried() {
    let f = fixture(FakeTools::flaky(TargetFormat::Mp3, 2));
    f.store.insert("abc.wav", &b"RIFF"[..]);

    let result = f.handler.convert(&job("abc.wav")).await;

    assert_eq!(result.status, ProcessStatus::Success, "{:?}", result.error);
    assert_eq!(f.tools.encodes(TargetFormat::Mp3), 3);
    assert!(f.store.contains("abc.mp3"));
}

#[tokio::test]
async fn transient_failures_beyond_the_budget_fail_the_job() {
    let f = fixture(FakeTools::flaky(TargetFormat::Mp3, 5));
    f.store.insert("abc.wav", &b"RIFF"[..]);

    let result = f.handler.convert(&job("abc.wav")).await;

    assert_eq!(result.status, ProcessStatus::Error);
    assert_eq!(f.tools.encodes(TargetFormat::Mp3), 3);
    assert!(f.store.contains("abc.wav"));
}

#[tokio::test]
async fn waveform_failure_does_not_fail_the_job() {
    let f = fixture(FakeTools {
        waveform_fails: true,
        ..Default::default()
    });
    f.store.insert("abc.wav", &b"RIFF"[..]);

    let result = f.handler.convert(&job("abc.wav")).await;

    assert_eq!(result.status, ProcessStatus::Success, "{:?}", result.error);
    assert!(f.store.contains("abc.mp3"));
    assert!(!f.store.contains("file-1_wf.png"));
}

#[tokio::test]
async fn missing_source_is_reported() {
    let f = fixture(FakeTools::default());

    let result = f.handler.convert(&job("missing.wav")).await;

    assert_eq!(result.status, ProcessStatus::Error);
    assert!(result.error.unwrap_or_default().contains("missing.wav"));
    assert_eq!(f.tools.encodes(TargetFormat::Mp3), 0);
    assert!(scratch_is_empty(&f.dir));
}

#[tokio::test]
async fn failed_upload_keeps_the_original() {
    let f = fixture(FakeTools::default());
    f.store.insert("abc.wav", &b"RIFF"[..]);
    f.store.fail_put("abc.mp3");

    let result = f.handler.convert(&job("abc.wav")).await;

    assert_eq!(result.status, ProcessStatus::Error);
    assert!(result.error.unwrap_or_default().contains("abc.mp3"));
    assert_eq!(f.store.keys(), vec!["abc.wav"]);
    assert!(scratch_is_empty(&f.dir));
}
