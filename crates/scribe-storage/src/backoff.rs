//! Linear retry used by transfers and scratch deletes.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Run `operation` up to `max_attempts` times, sleeping `attempt × unit`
/// after each failed attempt. Returns the last error.
pub async fn retry_linear<F, Fut, T, E>(
    what: &str,
    max_attempts: u32,
    unit: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                let delay = unit * attempt;
                warn!(
                    "{} attempt {}/{} failed, retrying in {:?}: {}",
                    what, attempt, max_attempts, delay, e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
