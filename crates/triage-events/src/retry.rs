//! Bounded retry with linear backoff.
//!
//! One combinator shared by the publish and index paths. It treats every
//! failure from the wrapped operation as retryable; callers keep permanent
//! failures (validation, parse, oversize) out of the retry path entirely.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Retry policy: up to `max_attempts` tries with `base_delay * attempt`
/// between them.
///
/// All retry state is local to a single [`RetryPolicy::run`] call, so
/// concurrent invocations never share attempt counters or timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(300),
        }
    }
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` is clamped to at least one.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay inserted after the given (1-based) failed attempt.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Run `operation` until it succeeds or attempts are exhausted.
    ///
    /// Each failed attempt is logged; the backoff sleep suspends only the
    /// calling task. After exhaustion the *last* error is returned.
    pub async fn run<T, E, F, Fut>(&self, name: &str, mut operation: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    warn!(
                        operation = name,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "attempt failed"
                    );
                    if attempt >= self.max_attempts {
                        return Err(error);
                    }
                    tokio::time::sleep(self.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
