//! Typed job payloads, one per queue.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Accept ids that the application sends either as strings or numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    })
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(i64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    }))
}

/// Audio/video conversion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionJob {
    /// Object key of the uploaded source file
    pub file_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

impl ConversionJob {
    pub fn new(file_key: impl Into<String>) -> Self {
        Self {
            file_key: file_key.into(),
            user_email_id: None,
            user_id: None,
            file_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>, file_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.file_id = Some(file_id.into());
        self
    }

    /// File id from the payload, falling back to the key's file stem.
    pub fn resolved_file_id(&self) -> String {
        self.file_id.clone().unwrap_or_else(|| {
            Path::new(&self.file_key)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.file_key.clone())
        })
    }
}

/// Automatic speech recognition job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsrJob {
    pub file_id: String,
}

/// LLM transcript marking job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmMarkingJob {
    pub order_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

/// YouTube ingestion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YoutubeIngestJob {
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    pub file_id: String,
    pub youtube_url: String,
    pub file_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conversion_job_accepts_both_shapes() {
        let legacy: ConversionJob =
            serde_json::from_value(json!({ "fileKey": "abc123.wav", "userEmailId": "a@b.c" }))
                .unwrap();
        assert_eq!(legacy.resolved_file_id(), "abc123");
        assert_eq!(legacy.user_id, None);

        let current: ConversionJob = serde_json::from_value(
            json!({ "fileKey": "uploads/abc123.wav", "userId": 42, "fileId": "f-1" }),
        )
        .unwrap();
        assert_eq!(current.user_id.as_deref(), Some("42"));
        assert_eq!(current.resolved_file_id(), "f-1");
    }

    #[test]
    fn youtube_job_requires_all_fields() {
        let missing = serde_json::from_value::<YoutubeIngestJob>(json!({ "userId": "1" }));
        assert!(missing.is_err());

        let job: YoutubeIngestJob = serde_json::from_value(json!({
            "userId": 9,
            "fileId": "yt1",
            "youtubeUrl": "https://youtu.be/x",
            "fileKey": "yt1.mp4"
        }))
        .unwrap();
        assert_eq!(job.user_id, "9");
    }

    #[test]
    fn marking_job_file_id_is_optional() {
        let job: LlmMarkingJob = serde_json::from_value(json!({ "orderId": 12 })).unwrap();
        assert_eq!(job.order_id, 12);
        assert!(job.file_id.is_none());
    }
}
