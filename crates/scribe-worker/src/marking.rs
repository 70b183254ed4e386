//! LLM transcript marking.
//!
//! Downloads `{fileId}.txt`, strips timestamps, sends the transcript part by
//! part to a chat completion endpoint, and stores the marked result in the
//! transcript cache.

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use scribe_models::{Job, LlmMarkingJob, QueueName};
use scribe_storage::StorageGateway;

use crate::config::{FileCacheConfig, LlmConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::handler::{decode_payload, JobHandler};

pub const PROCEEDINGS_MARKER: &str = "[--PROCEEDINGS--]";

const SYSTEM_PROMPT: &str = "You mark sections of court proceeding transcripts. \
You receive one part of a longer transcript at a time. Identify the proceeding \
and examination sections. Within an examination, replace the examiner's and the \
witness's speaker names with Q and A, and keep interruptions by anyone else under \
their own names. If an examination started in an earlier part, continue it without \
marking it again.";

const USER_TEMPLATE: &str = "{transcriptPart}

-----

Above is part of a court proceeding transcript. Start each examination with a \
line [--EXAMINATION--] followed by a line BY <examiner name>; never leave the \
name empty. When the same examiner resumes after an interruption, use \
[--EXAMINATION-CONTINUES--] instead. Prefix the examiner's questions with \"Q \" \
and the witness's answers with \"A \". Right after the witness is sworn in, insert \
the line: WHEREUPON, [--EXAMINEE--<witness name>--EXAMINEE--] having been called \
as a witness, being duly sworn by the notary public present, testified as follows:

Separate every paragraph with an empty line.";

static TIMESTAMP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\d{1,2}:\d{2}:\d{2}(?:\.\d+)?\][ \t]*").unwrap());

/// Remove `[hh:mm:ss]` markers.
pub fn strip_timestamps(text: &str) -> String {
    TIMESTAMP_PATTERN.replace_all(text, "").into_owned()
}

/// Split `text` into parts of at most `max_len` bytes, on paragraph
/// boundaries where possible.
pub fn split_parts(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut parts = Vec::new();
    let mut current = String::new();

    let paragraphs = text.split("\n\n").map(str::trim).filter(|p| !p.is_empty());
    for paragraph in paragraphs {
        for piece in split_long(paragraph, max_len) {
            if !current.is_empty() && current.len() + 2 + piece.len() > max_len {
                parts.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(piece);
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn split_long(paragraph: &str, max_len: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = paragraph;

    while rest.len() > max_len {
        let mut cut = max_len;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if let Some(space) = rest[..cut].rfind(char::is_whitespace) {
            if space > 0 {
                cut = space;
            }
        }
        if cut == 0 {
            cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        pieces.push(rest[..cut].trim_end());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        pieces.push(rest);
    }
    pieces
}

/// Final formatting applied to the joined LLM output.
pub fn finalize_transcript(marked: &str) -> String {
    format!("{PROCEEDINGS_MARKER}\n\n{}", marked.replace(". ", ".  "))
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct MarkingHandler {
    gateway: Arc<StorageGateway>,
    http: Client,
    llm: LlmConfig,
    cache: FileCacheConfig,
}

impl MarkingHandler {
    pub fn new(gateway: Arc<StorageGateway>, http: Client, llm: LlmConfig, cache: FileCacheConfig) -> Self {
        Self {
            gateway,
            http,
            llm,
            cache,
        }
    }

    pub async fn mark(&self, job: &LlmMarkingJob) -> WorkerResult<serde_json::Value> {
        let file_id = job
            .file_id
            .as_deref()
            .ok_or_else(|| WorkerError::invalid_payload(format!("order {} has no fileId", job.order_id)))?;

        let raw = self.gateway.fetch_bytes(&format!("{file_id}.txt")).await?;
        let transcript = strip_timestamps(&String::from_utf8_lossy(&raw));
        if transcript.trim().is_empty() {
            return Err(WorkerError::job_failed(format!("transcript not found for {file_id}")));
        }

        let started = Instant::now();
        let parts = split_parts(&transcript, self.llm.part_length);
        info!(file_id, parts = parts.len(), "Marking transcript");

        let mut marked = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            info!(file_id, part = index + 1, total = parts.len(), "Processing part");
            marked.push(self.complete(part).await?);
        }

        let transcript = finalize_transcript(&marked.join("\n\n"));
        info!(file_id, elapsed_secs = started.elapsed().as_secs_f64(), "Marking finished");

        self.save(file_id, &transcript).await?;
        Ok(json!({
            "orderId": job.order_id,
            "fileId": file_id,
            "length": transcript.len(),
        }))
    }

    async fn complete(&self, part: &str) -> WorkerResult<String> {
        let url = format!("{}/chat/completions", self.llm.api_url.trim_end_matches('/'));
        let body = json!({
            "model": self.llm.model,
            "temperature": 0,
            "seed": 1,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": USER_TEMPLATE.replace("{transcriptPart}", part) },
            ],
        });

        let completion: ChatCompletion = self
            .http
            .post(url)
            .bearer_auth(&self.llm.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| WorkerError::llm_failed("empty completion"))
    }

    async fn save(&self, file_id: &str, transcript: &str) -> WorkerResult<()> {
        let url = format!("{}/save-transcript", self.cache.url.trim_end_matches('/'));
        self.http
            .post(url)
            .header("x-api-key", &self.cache.api_key)
            .json(&json!({ "fileId": file_id, "transcript": transcript, "isCF": true }))
            .send()
            .await?
            .error_for_status()?;
        info!(file_id, "Saved marked transcript");
        Ok(())
    }
}

#[async_trait]
impl JobHandler for MarkingHandler {
    fn queue(&self) -> QueueName {
        QueueName::LlmMarking
    }

    async fn handle(&self, job: &Job) -> WorkerResult<serde_json::Value> {
        let payload: LlmMarkingJob = decode_payload(job)?;
        self.mark(&payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bracketed_timestamps() {
        let text = "[00:00:01] Mr A: Hello.\n[1:02:03.5] Mr B: Hi.";
        assert_eq!(strip_timestamps(text), "Mr A: Hello.\nMr B: Hi.");
        assert_eq!(strip_timestamps("[Exhibit 4] at 10:15"), "[Exhibit 4] at 10:15");
    }

    #[test]
    fn parts_respect_paragraphs_and_limit() {
        let text = "aaaa\n\nbbbb\n\ncccc";
        assert_eq!(split_parts(text, 10), vec!["aaaa\n\nbbbb", "cccc"]);

        let long = "one two three four";
        let parts = split_parts(long, 8);
        assert!(parts.iter().all(|p| p.len() <= 8), "{parts:?}");
        assert_eq!(parts.join(" "), long);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let parts = split_parts("ééééé", 3);
        assert_eq!(parts.concat(), "ééééé");
    }

    #[test]
    fn finalized_transcript_starts_with_marker() {
        let out = finalize_transcript("Q Yes. Sure.");
        assert_eq!(out, "[--PROCEEDINGS--]\n\nQ Yes.  Sure.");
    }
}
