//! Bounded retry with a fixed backoff.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use super::UpstreamError;

/// How often and how patiently to retry an upstream operation.
///
/// The policy is independent of the operation: [`RetryPolicy::run`] takes any
/// async attempt and repeats it on `Err` until it succeeds or the attempts run
/// out. An attempt that returns `Ok` is final, whatever it contains, so callers
/// encode "stop retrying" outcomes (a 409, a passthrough error status) as `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    per_attempt_timeout: Duration,
    backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` is clamped to at least one.
    #[must_use]
    pub const fn new(max_attempts: u32, per_attempt_timeout: Duration, backoff: Duration) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            per_attempt_timeout,
            backoff,
        }
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn per_attempt_timeout(&self) -> Duration {
        self.per_attempt_timeout
    }

    #[must_use]
    pub const fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Upper bound on how long [`RetryPolicy::run`] can take.
    #[must_use]
    pub fn worst_case(&self) -> Duration {
        (self.per_attempt_timeout + self.backoff).saturating_mul(self.max_attempts)
    }

    /// Run `attempt` until it returns `Ok` or the attempts are exhausted.
    ///
    /// Each attempt receives the per-attempt timeout to hand to the upstream
    /// call and is also cut off at that timeout here, so a misbehaving attempt
    /// cannot stretch the bound. The last error is returned when every attempt
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, UpstreamError>
    where
        F: FnMut(Duration) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut number = 1;
        loop {
            let outcome = tokio::time::timeout(
                self.per_attempt_timeout,
                attempt(self.per_attempt_timeout),
            )
            .await
            .unwrap_or(Err(UpstreamError::Timeout(self.per_attempt_timeout)));

            match outcome {
                Ok(value) => {
                    if number > 1 {
                        info!(operation, attempt = number, "upstream operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if number >= self.max_attempts => {
                    warn!(operation, attempts = number, error = %error, "upstream operation failed, giving up");
                    return Err(error);
                }
                Err(error) => {
                    warn!(
                        operation,
                        attempt = number,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "upstream attempt failed, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                    number += 1;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use reqwest::StatusCode;

    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(10))
    }

    fn failure() -> UpstreamError {
        UpstreamError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1), Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_worst_case() {
        let policy = RetryPolicy::new(3, Duration::from_secs(30), Duration::from_secs(2));
        assert_eq!(policy.worst_case(), Duration::from_secs(96));
    }

    #[tokio::test]
    async fn test_first_success_is_returned() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, UpstreamError>(7) }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = fast_policy()
            .run("test", |_| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(failure())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_with_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy()
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(failure()) }
            })
            .await;

        assert_eq!(result.unwrap_err().status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_hung_attempt_is_cut_off() {
        let policy = fast_policy();
        let started = Instant::now();

        let result: Result<(), _> = policy
            .run("test", |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert!(started.elapsed() < policy.worst_case() + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_attempt_receives_timeout() {
        let policy = fast_policy();
        let seen = policy
            .run("test", |timeout| async move { Ok::<_, UpstreamError>(timeout) })
            .await
            .unwrap();
        assert_eq!(seen, Duration::from_millis(100));
    }
}
