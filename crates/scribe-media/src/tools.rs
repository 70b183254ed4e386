//! Media tool configuration and the [`MediaTools`] seam used by the worker.

use std::env;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::command::ToolRunner;
use crate::error::MediaResult;
use crate::formats::TargetFormat;
use crate::probe::{probe_media, MediaInfo};
use crate::transcode::encode_command;
use crate::waveform::generate_waveform;

/// Paths of the external executables.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub waveform_path: PathBuf,
    pub ytdlp_path: PathBuf,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            waveform_path: PathBuf::from("audiowaveform"),
            ytdlp_path: PathBuf::from("yt-dlp"),
        }
    }
}

impl MediaConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let path = |var: &str, default: PathBuf| env::var(var).map(PathBuf::from).unwrap_or(default);
        Self {
            ffmpeg_path: path("FFMPEG_PATH", defaults.ffmpeg_path),
            ffprobe_path: path("FFPROBE_PATH", defaults.ffprobe_path),
            waveform_path: path("WAVEFORM_PATH", defaults.waveform_path),
            ytdlp_path: path("YTDLP_PATH", defaults.ytdlp_path),
        }
    }
}

/// Probe, encode and waveform operations over local files.
#[async_trait]
pub trait MediaTools: Send + Sync {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo>;

    /// Encode `input` into `target`, writing `output`.
    async fn encode(
        &self,
        target: TargetFormat,
        input: &Path,
        output: &Path,
        info: &MediaInfo,
    ) -> MediaResult<()>;

    /// Render a waveform PNG of `audio`, using `wav` as the intermediate.
    async fn waveform(&self, audio: &Path, wav: &Path, png: &Path) -> MediaResult<()>;
}

/// [`MediaTools`] backed by FFmpeg, FFprobe and audiowaveform processes.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    config: MediaConfig,
    ffmpeg: ToolRunner,
    waveform: ToolRunner,
}

impl FfmpegTools {
    pub fn new(config: MediaConfig) -> Self {
        Self {
            ffmpeg: ToolRunner::new(&config.ffmpeg_path),
            waveform: ToolRunner::new(&config.waveform_path),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(MediaConfig::from_env())
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// Resolve every executable, failing on the first one missing.
    pub fn check(&self) -> MediaResult<()> {
        for runner in [
            &self.ffmpeg,
            &ToolRunner::new(&self.config.ffprobe_path),
            &self.waveform,
        ] {
            let resolved = runner.check()?;
            info!("Found {}", resolved.display());
        }
        Ok(())
    }
}

#[async_trait]
impl MediaTools for FfmpegTools {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        probe_media(&self.config.ffprobe_path, path).await
    }

    async fn encode(
        &self,
        target: TargetFormat,
        input: &Path,
        output: &Path,
        info: &MediaInfo,
    ) -> MediaResult<()> {
        let cmd = encode_command(target, input, output, info);
        self.ffmpeg.run_ffmpeg(&cmd).await?;
        Ok(())
    }

    async fn waveform(&self, audio: &Path, wav: &Path, png: &Path) -> MediaResult<()> {
        generate_waveform(&self.ffmpeg, &self.waveform, audio, wav, png).await
    }
}
