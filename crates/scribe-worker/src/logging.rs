//! Tracing setup and structured job logging.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scribe_models::{JobId, QueueName};

/// Install the global subscriber.
///
/// `LOG_FORMAT=json` selects JSON output; otherwise output is human-readable.
/// `RUST_LOG` directives are honored on top of `scribe=info`.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["scribe=info", "aws_config=warn", "aws_smithy_runtime=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    let result = if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing already initialized: {e}");
    }
}

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    queue: QueueName,
    file_id: Option<String>,
}

impl JobLogger {
    pub fn new(job_id: &JobId, queue: QueueName, file_id: Option<&str>) -> Self {
        Self {
            job_id: job_id.to_string(),
            queue,
            file_id: file_id.map(str::to_string),
        }
    }

    fn file_id(&self) -> &str {
        self.file_id.as_deref().unwrap_or("-")
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            queue = %self.queue,
            file_id = %self.file_id(),
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            queue = %self.queue,
            file_id = %self.file_id(),
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            queue = %self.queue,
            file_id = %self.file_id(),
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            queue = %self.queue,
            file_id = %self.file_id(),
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            queue = %self.queue,
            file_id = %self.file_id(),
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Span carrying the job's identifying fields.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            queue = %self.queue,
            file_id = %self.file_id()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let logger = JobLogger::new(
            &JobId::from_string("42"),
            QueueName::LlmMarking,
            Some("f-1"),
        );
        assert_eq!(logger.job_id(), "42");
        assert_eq!(logger.file_id(), "f-1");
    }

    #[test]
    fn missing_file_id_renders_placeholder() {
        let logger = JobLogger::new(&JobId::from_string("1"), QueueName::LlmMarking, None);
        assert_eq!(logger.file_id(), "-");
    }
}
