//! FFmpeg, FFprobe and audiowaveform wrapper for the Scribe media pipeline.
//!
//! This crate provides:
//! - Codec-aware encoding parameters for MP3 and MP4 derivatives
//! - Retry classification of encoder failures
//! - FFprobe media inspection
//! - Waveform rendering and `yt-dlp` streaming downloads

pub mod command;
pub mod error;
pub mod failure;
pub mod formats;
pub mod probe;
pub mod tools;
pub mod transcode;
pub mod waveform;
pub mod ytdlp;

pub use command::{FfmpegCommand, ToolRunner};
pub use error::{MediaError, MediaResult};
pub use failure::{is_retryable_error, EncoderFailure};
pub use formats::{extension_of, is_video, keeps_original, targets_for, TargetFormat, VIDEO_EXTENSIONS};
pub use probe::{check_ffprobe, parse_probe_output, probe_media, MediaInfo};
pub use tools::{FfmpegTools, MediaConfig, MediaTools};
pub use transcode::{conversion_retry_config, convert_with_retry, encode_command, is_h264_family};
pub use waveform::generate_waveform;
pub use ytdlp::{is_progress_noise, spawn_download, YtDlpStream};
