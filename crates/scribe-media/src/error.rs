//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use crate::failure::{is_retryable_error, EncoderFailure};

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found")]
    ToolNotFound(String),

    #[error("Encoder failed: {0}")]
    Encoder(EncoderFailure),

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid media file: {0}")]
    InvalidMedia(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound(tool.into())
    }

    pub fn invalid_media(message: impl Into<String>) -> Self {
        Self::InvalidMedia(message.into())
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            MediaError::Encoder(failure) => is_retryable_error(failure),
            MediaError::Io(e) => is_retryable_error(&EncoderFailure::from_io("io", e)),
            _ => false,
        }
    }

    /// The encoder failure behind this error, if any.
    pub fn encoder_failure(&self) -> Option<&EncoderFailure> {
        match self {
            MediaError::Encoder(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<EncoderFailure> for MediaError {
    fn from(failure: EncoderFailure) -> Self {
        Self::Encoder(failure)
    }
}
