//! A single retry combinator used at every I/O boundary, parameterized by
//! max attempts, base delay, jitter, and a caller-supplied error classifier,
//! rather than ad-hoc retry/backoff scattered across call sites.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, jitter: Duration) -> Self {
        Self { max_attempts, base_delay, jitter }
    }

    /// Exponential backoff for the given zero-based attempt index, plus
    /// uniform jitter in `[0, jitter)`.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16); // guard against absurd shift overflow
        let backoff = self.base_delay.saturating_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX));
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..self.jitter)
        };
        backoff + jitter
    }
}

/// Runs `op` until it succeeds, the classifier says an error is not
/// retryable, or `max_attempts` is exhausted.
///
/// `classify` receives each error and returns `true` iff it is transient and
/// worth retrying. Non-transient errors are returned immediately.
pub async fn retry<T, E, Fut, F, C>(
    policy: RetryPolicy,
    operation_name: &str,
    mut op: F,
    classify: C,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 >= policy.max_attempts || !classify(&err) => {
                warn!(
                    "event=retry_exhausted operation={operation_name} attempt={} error={err}",
                    attempt + 1
                );
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    "event=retrying operation={operation_name} attempt={} delay_ms={} error={err}",
                    attempt + 1,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct Transient;
    impl std::fmt::Display for Transient {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "transient")
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(1));
        let attempts = Cell::new(0);
        let result: Result<u32, Transient> = retry(
            policy,
            "test-op",
            || {
                let n = attempts.get();
                attempts.set(n + 1);
                async move {
                    if n < 2 {
                        Err(Transient)
                    } else {
                        Ok(42)
                    }
                }
            },
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test]
    async fn stops_on_non_retryable_error() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(1));
        let attempts = Cell::new(0);
        let result: Result<u32, Transient> = retry(
            policy,
            "test-op",
            || {
                attempts.set(attempts.get() + 1);
                async { Err(Transient) }
            },
            |_| false,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(1));
        let attempts = Cell::new(0);
        let result: Result<u32, Transient> = retry(
            policy,
            "test-op",
            || {
                attempts.set(attempts.get() + 1);
                async { Err(Transient) }
            },
            |_| true,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.get(), 3);
    }
}
