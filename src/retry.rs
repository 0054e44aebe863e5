//! Retry an async operation with exponential backoff.
//!
//! Used at process startup, where the broker (or the database) may still be booting when the
//! service comes up.
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// How many times, and how patiently, an operation is retried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure. It doubles after each subsequent failure.
    pub initial_delay: Duration,
    /// Upper bound on the delay between two attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// 3 attempts, waiting 2 seconds then 4 seconds (capped at 10 seconds) between them.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// The delay before attempt number `attempt + 1`, `attempt` starting at 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Call `operation` until it succeeds or `policy.max_attempts` attempts have failed.
///
/// The error of the last attempt is returned. At least one attempt is always made.
pub async fn retry<F, Fut, T, E>(label: &str, policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_if(label, policy, operation, |_| true).await
}

/// Like [`retry`], but errors for which `is_transient` returns `false` are returned immediately.
pub async fn retry_if<F, Fut, T, E, P>(
    label: &str,
    policy: &RetryPolicy,
    mut operation: F,
    is_transient: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts || !is_transient(&e) => {
                tracing::error!(error = %e, attempts = attempt, "{label} failed, giving up");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    "{label} failed, retrying in {}s",
                    delay.as_secs_f32()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
