//! Bounded retry with exponential backoff for calls to external services.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// How many times, and how patiently, an external call is attempted.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `0` behaves like `1`.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Factor applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Policy that attempts each call exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Policy with the given attempt count and initial delay.
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            ..Self::default()
        }
    }

    fn next_delay(&self, current: Duration) -> Duration {
        Duration::from_secs_f64(current.as_secs_f64() * self.multiplier.max(1.0))
            .min(self.max_delay)
    }
}

/// Classifies failures worth another attempt.
pub trait Retryable {
    /// Returns true when the failure is transient.
    fn is_retryable(&self) -> bool;
}

/// Whether an HTTP status signals a transient condition.
pub fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
}

/// Run `operation` until it succeeds, fails permanently, or exhausts the policy.
///
/// The last error is returned unchanged.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= max_attempts || !error.is_retryable() {
                    return Err(error);
                }
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "External call failed; retrying"
                );
                sleep(delay).await;
                delay = policy.next_delay(delay);
            }
        }
    }
}
