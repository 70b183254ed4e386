//! Waveform image generation.
//!
//! The audio is first decoded to a mono WAV with FFmpeg, then rendered to a
//! PNG by `audiowaveform`.

use std::path::Path;

use tracing::debug;

use crate::command::{FfmpegCommand, ToolRunner};
use crate::error::MediaResult;

pub const WAVEFORM_WIDTH: u32 = 1800;
pub const WAVEFORM_HEIGHT: u32 = 140;
const WAVEFORM_SAMPLE_RATE: u32 = 44_100;

/// Decode `audio` to a mono 16-bit WAV.
pub fn wav_command(audio: &Path, wav: &Path) -> FfmpegCommand {
    FfmpegCommand::new(audio, wav)
        .no_video()
        .channels(1)
        .sample_rate(WAVEFORM_SAMPLE_RATE)
        .audio_codec("pcm_s16le")
}

/// Arguments for rendering `wav` into `png`.
pub fn waveform_args(wav: &Path, png: &Path) -> Vec<String> {
    vec![
        "-i".to_string(),
        wav.to_string_lossy().into_owned(),
        "-o".to_string(),
        png.to_string_lossy().into_owned(),
        "--width".to_string(),
        WAVEFORM_WIDTH.to_string(),
        "--height".to_string(),
        WAVEFORM_HEIGHT.to_string(),
        "--no-axis-labels".to_string(),
    ]
}

/// Render the waveform of `audio` into `png`, using `wav` as the intermediate.
pub async fn generate_waveform(
    ffmpeg: &ToolRunner,
    generator: &ToolRunner,
    audio: &Path,
    wav: &Path,
    png: &Path,
) -> MediaResult<()> {
    ffmpeg.run_ffmpeg(&wav_command(audio, wav)).await?;
    debug!("Decoded {} for waveform", audio.display());
    generator.run(waveform_args(wav, png)).await?;
    Ok(())
}
