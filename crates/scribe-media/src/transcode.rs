//! Encoding parameters and retried conversion.

use std::path::Path;
use std::time::Duration;

use metrics::counter;
use scribe_models::{with_retry_if, RetryConfig, RetryOutcome};
use tracing::{info, warn};

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::formats::TargetFormat;
use crate::probe::MediaInfo;
use crate::tools::MediaTools;

pub const MP3_SAMPLE_RATE: u32 = 44_100;
pub const MP3_BITRATE: &str = "128k";
pub const MP3_MAX_CHANNELS: u32 = 2;
pub const MP4_CRF: u8 = 23;

/// Video codecs that can be stream-copied into an MP4.
const H264_FAMILY: &[&str] = &["h264", "avc1", "x264"];

pub fn is_h264_family(codec: Option<&str>) -> bool {
    codec.is_some_and(|c| H264_FAMILY.contains(&c.to_ascii_lowercase().as_str()))
}

/// FFmpeg command producing `target` from `input`.
pub fn encode_command(
    target: TargetFormat,
    input: &Path,
    output: &Path,
    info: &MediaInfo,
) -> FfmpegCommand {
    let cmd = FfmpegCommand::new(input, output);
    match target {
        TargetFormat::Mp3 => {
            let cmd = cmd
                .no_video()
                .sample_rate(MP3_SAMPLE_RATE)
                .audio_bitrate(MP3_BITRATE)
                .audio_codec("libmp3lame");
            match info.channels {
                Some(channels) if channels > MP3_MAX_CHANNELS => cmd.channels(MP3_MAX_CHANNELS),
                _ => cmd,
            }
        }
        TargetFormat::Mp4 => {
            let cmd = if is_h264_family(info.video_codec.as_deref()) {
                cmd.video_codec("copy")
            } else {
                cmd.video_codec("libx264").crf(MP4_CRF)
            };
            cmd.audio_codec("aac")
        }
    }
}

/// Retry policy for one conversion: 3 attempts, 1 s base delay, doubling.
pub fn conversion_retry_config(target: TargetFormat) -> RetryConfig {
    RetryConfig::new(format!("{target} conversion"))
        .with_max_retries(3)
        .with_initial_delay(Duration::from_secs(1))
        .with_backoff_factor(2.0)
        .with_max_delay(Duration::from_secs(30))
}

/// Encode `input` to `target`, retrying only failures classified as transient.
pub async fn convert_with_retry(
    tools: &dyn MediaTools,
    target: TargetFormat,
    input: &Path,
    output: &Path,
    info: &MediaInfo,
    retry: &RetryConfig,
) -> MediaResult<()> {
    let outcome = with_retry_if(
        retry,
        || {
            counter!("scribe_conversion_attempts_total", "format" => target.extension()).increment(1);
            tools.encode(target, input, output, info)
        },
        MediaError::is_retryable,
    )
    .await;

    match outcome {
        RetryOutcome::Success { attempts, .. } => {
            info!(format = %target, attempts, output = %output.display(), "Conversion succeeded");
            Ok(())
        }
        RetryOutcome::Failed {
            error,
            attempts,
            retryable,
        } => {
            warn!(
                format = %target,
                attempts,
                retryable,
                "Conversion failed: {}", error
            );
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(target: TargetFormat, info: &MediaInfo) -> Vec<String> {
        encode_command(target, Path::new("in"), Path::new("out"), info).build_args()
    }

    fn has_pair(args: &[String], a: &str, b: &str) -> bool {
        args.windows(2).any(|w| w[0] == a && w[1] == b)
    }

    #[test]
    fn mp4_copies_h264_video() {
        for codec in ["h264", "AVC1", "x264"] {
            let info = MediaInfo {
                video_codec: Some(codec.into()),
                ..Default::default()
            };
            let args = args(TargetFormat::Mp4, &info);
            assert!(has_pair(&args, "-c:v", "copy"), "{codec}");
            assert!(has_pair(&args, "-c:a", "aac"));
            assert!(!args.contains(&"-crf".to_string()));
        }
    }

    #[test]
    fn mp4_reencodes_other_codecs() {
        let info = MediaInfo {
            video_codec: Some("vp9".into()),
            ..Default::default()
        };
        let args = args(TargetFormat::Mp4, &info);
        assert!(has_pair(&args, "-c:v", "libx264"));
        assert!(has_pair(&args, "-crf", "23"));
        assert!(has_pair(&args, "-c:a", "aac"));
    }

    #[test]
    fn mp3_downmixes_surround_only() {
        let surround = MediaInfo {
            channels: Some(6),
            ..Default::default()
        };
        let args6 = args(TargetFormat::Mp3, &surround);
        assert!(has_pair(&args6, "-ac", "2"));
        assert!(has_pair(&args6, "-ar", "44100"));
        assert!(has_pair(&args6, "-b:a", "128k"));
        assert!(has_pair(&args6, "-c:a", "libmp3lame"));

        let stereo = MediaInfo {
            channels: Some(2),
            ..Default::default()
        };
        assert!(!args(TargetFormat::Mp3, &stereo).contains(&"-ac".to_string()));
    }
}
