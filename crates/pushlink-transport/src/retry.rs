//! Retry policy for the sequential transport
//!
//! Wraps the backoff strategy from `pushlink-core` with the transport's
//! retry rule: only connect-phase timeouts are retried.

use crate::error::{Result, TransportError};
use pushlink_core::retry::{Exhausted, RetryState};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

pub use pushlink_core::retry::{BackoffStrategy, ExponentialBackoff, ExponentialBackoffBuilder};

/// Connect-timeout retry policy.
///
/// # Default Configuration
///
/// - `max_retries`: 3
/// - `initial_delay`: 500ms
/// - `max_delay`: 10s
/// - `multiplier`: 2.0
/// - `jitter`: 0.1
///
/// # Examples
///
/// ```rust
/// use pushlink_transport::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::builder()
///     .max_retries(5)
///     .initial_delay(Duration::from_millis(100))
///     .build();
/// assert_eq!(policy.max_retry_times(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    inner: ExponentialBackoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new builder.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Default delays with the given retry limit.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self::builder().max_retries(max_retries).build()
    }

    /// Retry up to `max_retries` times without sleeping in between.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            inner: ExponentialBackoff::immediate(max_retries),
        }
    }

    /// Configured retry limit.
    pub fn max_retry_times(&self) -> u32 {
        self.inner.max_retries()
    }

    /// Get the underlying backoff.
    pub fn inner(&self) -> &ExponentialBackoff {
        &self.inner
    }

    /// Delay before retry number `retry` (0-based).
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        self.inner.next_delay(retry).unwrap_or(Duration::ZERO)
    }

    /// Whether an error qualifies for another attempt.
    pub fn is_retryable(error: &TransportError) -> bool {
        error.is_retryable()
    }

    /// Run one logical call, retrying connect-phase timeouts.
    ///
    /// At most `max_retry_times + 1` attempts are made. When the limit is
    /// reached the last connect timeout is returned with the attempt count.
    /// Any other error ends the call immediately.
    pub async fn run<F, Fut, T>(&self, mut attempt: F) -> Result<T>
    where
        F: FnMut(RetryState) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        self.inner
            .retry_if(
                |state| {
                    if state.retries() > 0 {
                        debug!("connect timed out - retry again - {}", state.retries());
                    }
                    attempt(state)
                },
                |error, _| Self::is_retryable(error),
            )
            .await
            .map_err(with_attempts)
    }
}

fn with_attempts(exhausted: Exhausted<TransportError>) -> TransportError {
    let attempts = exhausted.attempts;
    match exhausted.into_inner() {
        TransportError::Connection {
            reason, message, ..
        } => TransportError::Connection {
            reason,
            attempts,
            message,
        },
        other => other,
    }
}

impl BackoffStrategy for RetryPolicy {
    fn next_delay(&self, retry: u32) -> Option<Duration> {
        self.inner.next_delay(retry)
    }

    fn max_retries(&self) -> u32 {
        self.inner.max_retries()
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryPolicyBuilder {
    inner: ExponentialBackoffBuilder,
}

impl RetryPolicyBuilder {
    /// Set the maximum number of retries after the first attempt.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.inner = self.inner.max_retries(max_retries);
        self
    }

    /// Set the delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.inner = self.inner.initial_delay(delay);
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.inner = self.inner.max_delay(delay);
        self
    }

    /// Set the exponential multiplier.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.inner = self.inner.multiplier(multiplier);
        self
    }

    /// Set the jitter factor (0.0 to 1.0).
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.inner = self.inner.jitter(jitter);
        self
    }

    /// Build the retry policy.
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            inner: self.inner.build(),
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            inner: ExponentialBackoff::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(500))
                .max_delay(Duration::from_secs(10))
                .multiplier(2.0)
                .jitter(0.1),
        }
    }
}
