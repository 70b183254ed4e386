//! Retry utilities with exponential backoff.
//!
//! Errors are returned as values: [`with_retry`] never panics or propagates,
//! callers inspect the [`RetryOutcome`] and decide how to escalate.
//!
//! Which errors are retried is decided by typed matchers evaluated against
//! the rendered error message, or by an explicit classifier closure over the
//! typed error ([`with_retry_if`]).

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Decides whether a rendered error message is retryable.
#[derive(Clone)]
pub enum RetryMatcher {
    /// Case-insensitive substring match.
    Contains(String),
    /// Arbitrary predicate over the rendered message.
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl RetryMatcher {
    pub fn contains(pattern: impl Into<String>) -> Self {
        Self::Contains(pattern.into().to_lowercase())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    pub fn matches(&self, message: &str) -> bool {
        match self {
            RetryMatcher::Contains(pattern) => message.to_lowercase().contains(pattern.as_str()),
            RetryMatcher::Predicate(f) => f(message),
        }
    }
}

impl fmt::Debug for RetryMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryMatcher::Contains(p) => f.debug_tuple("Contains").field(p).finish(),
            RetryMatcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    pub max_retries: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// When set, only errors matching one of these are retried.
    pub retry_errors: Option<Vec<RetryMatcher>>,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            retry_errors: None,
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with the given operation name.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_retry_errors(mut self, matchers: Vec<RetryMatcher>) -> Self {
        self.retry_errors = Some(matchers);
        self
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Whether the rendered error passes the configured matchers.
    pub fn is_retryable_message(&self, message: &str) -> bool {
        match &self.retry_errors {
            None => true,
            Some(matchers) => matchers.iter().any(|m| m.matches(message)),
        }
    }
}

/// Result of a retried operation.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// Operation succeeded.
    Success { value: T, attempts: u32 },
    /// Operation failed; `retryable` is false when the error was rejected by policy.
    Failed { error: E, attempts: u32, retryable: bool },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::Failed { error, .. } => Err(error),
        }
    }
}

/// Execute an async operation, retrying failures whose message passes the
/// config's matchers.
///
/// # Example
/// ```ignore
/// let config = RetryConfig::new("s3_put").with_max_retries(3);
/// let outcome = with_retry(&config, || async { client.put().await }).await;
/// ```
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    with_retry_if(config, operation, |e: &E| {
        config.is_retryable_message(&e.to_string())
    })
    .await
}

/// Execute an async operation, retrying failures accepted by `classify`.
pub async fn with_retry_if<F, Fut, T, E, C>(
    config: &RetryConfig,
    mut operation: F,
    classify: C,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    C: Fn(&E) -> bool,
{
    let max_attempts = config.max_retries.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    attempts: attempt,
                }
            }
            Err(e) if !classify(&e) => {
                debug!(
                    "{} attempt {} failed with non-retryable error: {}",
                    config.operation_name, attempt, e
                );
                return RetryOutcome::Failed {
                    error: e,
                    attempts: attempt,
                    retryable: false,
                };
            }
            Err(e) if attempt < max_attempts => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "{} attempt {}/{} failed, retrying in {:?}: {}",
                    config.operation_name, attempt, max_attempts, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return RetryOutcome::Failed {
                    error: e,
                    attempts: attempt,
                    retryable: true,
                }
            }
        }
    }
}

/// State tracker for repeated operations that may fail intermittently.
///
/// Used by long-running loops (queue polling, heartbeats) to suppress log
/// spam after repeated failures.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
            suppressed: false,
        }
    }

    /// Record a successful operation (resets failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            debug!(
                "Operation recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Record a failed operation.
    ///
    /// Returns `true` if this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn fast_config() -> RetryConfig {
        RetryConfig::new("test")
            .with_max_retries(3)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_factor(2.0)
            .with_max_delay(Duration::from_millis(300))
    }

    #[test]
    fn delay_grows_and_caps() {
        let config = fast_config();
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(300));
        assert_eq!(config.delay_for_attempt(10), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_makes_exactly_max_attempts_within_bounds() {
        let config = fast_config();
        let calls = Mutex::new(Vec::new());

        let outcome = with_retry(&config, || {
            calls.lock().unwrap().push(tokio::time::Instant::now());
            async { Err::<(), _>("connection reset") }
        })
        .await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.attempts(), 3);

        let calls = calls.into_inner().unwrap();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap <= Duration::from_millis(300), "gap {:?} exceeds cap", gap);
        }
    }

    #[tokio::test]
    async fn immediate_success_is_one_attempt() {
        let config = RetryConfig::new("test");
        let calls = AtomicU32::new(0);

        let outcome = with_retry(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        })
        .await;

        assert_eq!(outcome.attempts(), 1);
        assert_eq!(outcome.into_result().unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn eventual_success_reports_attempts() {
        let config = fast_config();
        let calls = AtomicU32::new(0);

        let outcome = with_retry(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 3);
    }

    #[tokio::test]
    async fn unmatched_error_fails_without_retry() {
        let config = fast_config().with_retry_errors(vec![
            RetryMatcher::contains("ECONNRESET"),
            RetryMatcher::contains("timeout"),
        ]);
        let calls = AtomicU32::new(0);

        let outcome = with_retry(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("Invalid data found when processing input") }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match outcome {
            RetryOutcome::Failed { retryable, attempts, .. } => {
                assert!(!retryable);
                assert_eq!(attempts, 1);
            }
            RetryOutcome::Success { .. } => panic!("expected failure"),
        }
    }

    #[test]
    fn matchers_are_case_insensitive() {
        let config = RetryConfig::new("test").with_retry_errors(vec![
            RetryMatcher::contains("Timeout"),
            RetryMatcher::predicate(|m| m.starts_with("503")),
        ]);
        assert!(config.is_retryable_message("socket TIMEOUT after 30s"));
        assert!(config.is_retryable_message("503 Service Unavailable"));
        assert!(!config.is_retryable_message("404 Not Found"));
    }

    #[test]
    fn failure_tracker_suppression() {
        let mut tracker = FailureTracker::new(2);

        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }
}
