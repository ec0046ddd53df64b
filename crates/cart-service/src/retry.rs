//! Retry with exponential backoff for commands that lose a version race.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Initial backoff duration (doubles on each retry).
    pub initial_backoff: Duration,
    /// Maximum backoff duration to cap exponential growth.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    /// A policy that runs the operation exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Retries a fallible async operation while `should_retry` accepts its error.
///
/// Errors the predicate rejects are returned at once. After
/// `max_attempts` the last error is returned.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    operation: F,
    config: &RetryConfig,
    should_retry: P,
    context: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    let mut backoff = config.initial_backoff;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(context = %context, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        context = %context,
                        attempts = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                debug!(
                    context = %context,
                    attempt,
                    max_attempts = config.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying with backoff"
                );

                sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
        }
    }
}
