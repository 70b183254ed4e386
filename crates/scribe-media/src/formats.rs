//! Source formats and derived targets.

use std::path::Path;

/// Source extensions that get an MP4 derivative.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "wmv", "flv", "mkv", "webm", "mpg", "mpeg", "m4v", "3gp", "mts", "mp2t",
    "ogv", "mxf",
];

/// Lowercased extension of a key or path, without the dot.
pub fn extension_of(key: &str) -> Option<String> {
    Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_video(key: &str) -> bool {
    extension_of(key).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// Derived artifact formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    Mp3,
    Mp4,
}

impl TargetFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Mp3 => "mp3",
            TargetFormat::Mp4 => "mp4",
        }
    }

    /// Whether a source with this key already is in the target format.
    pub fn matches(&self, key: &str) -> bool {
        extension_of(key).as_deref() == Some(self.extension())
    }
}

impl std::fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Derivatives to produce for a source key.
///
/// MP3 sources need nothing. Video sources need an MP3, plus an MP4 unless
/// they already are one. Everything else gets an MP3.
pub fn targets_for(key: &str) -> Vec<TargetFormat> {
    if TargetFormat::Mp3.matches(key) {
        Vec::new()
    } else if is_video(key) && !TargetFormat::Mp4.matches(key) {
        vec![TargetFormat::Mp3, TargetFormat::Mp4]
    } else {
        vec![TargetFormat::Mp3]
    }
}

/// The original is kept when it already is a delivery format.
pub fn keeps_original(key: &str) -> bool {
    TargetFormat::Mp3.matches(key) || TargetFormat::Mp4.matches(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_per_source() {
        assert!(targets_for("a.mp3").is_empty());
        assert!(targets_for("a.MP3").is_empty());
        assert_eq!(targets_for("a.mp4"), vec![TargetFormat::Mp3]);
        assert_eq!(targets_for("a.wav"), vec![TargetFormat::Mp3]);
        assert_eq!(targets_for("a.m4a"), vec![TargetFormat::Mp3]);
        assert_eq!(targets_for("a.mov"), vec![TargetFormat::Mp3, TargetFormat::Mp4]);
        assert_eq!(targets_for("dir/a.MXF"), vec![TargetFormat::Mp3, TargetFormat::Mp4]);
    }

    #[test]
    fn original_is_kept_only_for_delivery_formats() {
        assert!(keeps_original("a.mp3"));
        assert!(keeps_original("a.mp4"));
        assert!(!keeps_original("a.wav"));
        assert!(!keeps_original("a.webm"));
    }
}
