//! Retry utility for handling transient errors in async operations
//!
//! Provides retry policies with full-jitter exponential backoff. A policy
//! without an attempt limit retries until the operation succeeds, which is
//! how every steady-state store call in the queue engine is driven.

use std::time::Duration;
use tokio::time::sleep;

/// Configurable retry policy for async operations
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts; `None` retries forever
    pub max_attempts: Option<usize>,
    /// Base delay the backoff bound grows from
    pub base_delay: Duration,
    /// Ceiling for the backoff bound
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(3),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that never gives up
    pub fn unbounded(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: None,
            base_delay,
            max_delay,
        }
    }

    /// Upper bound of the delay drawn after the given failed attempt (0-based)
    pub fn backoff_bound(&self, attempt: usize) -> Duration {
        let shift = attempt.min(31) as u32;
        self.base_delay
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Full-jitter delay: uniform between zero and the backoff bound
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let bound = self.backoff_bound(attempt).as_millis() as u64;
        Duration::from_millis(fastrand::u64(0..=bound))
    }

    fn allows_retry_after(&self, attempt: usize) -> bool {
        match self.max_attempts {
            Some(max) => attempt + 1 < max,
            None => true,
        }
    }
}

/// Execute an async operation with retry logic for transient errors
///
/// `on_error` observes every failed attempt (with its 0-based attempt number)
/// before the backoff sleep; it is how callers report each failure to their
/// error sink. Errors for which `is_retryable` returns false end the loop
/// immediately.
///
/// # Examples
/// ```rust
/// use disruptor::core::retry::{retry_async, RetryPolicy};
///
/// # async fn example() -> Result<String, String> {
/// let result = retry_async(
///     "store_append",
///     &RetryPolicy::default(),
///     |_: &String| true,
///     |_, _| {},
///     || async { Ok::<String, String>("appended".to_string()) },
/// )
/// .await?;
/// # Ok(result)
/// # }
/// ```
pub async fn retry_async<F, T, E, Fut, R, O>(
    operation_name: &str,
    policy: &RetryPolicy,
    is_retryable: R,
    mut on_error: O,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
    O: FnMut(&E, usize),
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                on_error(&error, attempt);
                if !is_retryable(&error) || !policy.allows_retry_after(attempt) {
                    return Err(error);
                }
                let delay = policy.backoff_delay(attempt);
                log::debug!(
                    "Operation '{}' failed on attempt {}, retrying in {:?}: {}",
                    operation_name,
                    attempt + 1,
                    delay,
                    error
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
