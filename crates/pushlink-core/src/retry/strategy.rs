//! The retry loop and the state it threads through each attempt.

use async_trait::async_trait;
use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Attempt counter for one logical call.
///
/// A fresh state is created for every call and dropped when the call
/// returns; nothing is carried over between calls. The counter is bounded by
/// the strategy's `max_retries`, so a call makes at most `max_retries + 1`
/// attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    max_retries: u32,
}

impl RetryState {
    /// Create a state that allows `max_retries` retries after the first attempt.
    pub fn new(max_retries: u32) -> Self {
        Self {
            attempts: 0,
            max_retries,
        }
    }

    /// Record that an attempt is starting and return its 1-based number.
    pub fn record_attempt(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    /// Number of attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Number of retries started so far (attempts after the first).
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// Configured retry limit.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Upper bound on the number of attempts for this call.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt may still be started.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts()
    }
}

/// The error that ended a retry loop, with the number of attempts made.
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempt(s): {error}")]
pub struct Exhausted<E: StdError + 'static> {
    /// Error returned by the last attempt.
    #[source]
    pub error: E,
    /// Total attempts made, including the first one.
    pub attempts: u32,
}

impl<E: StdError + 'static> Exhausted<E> {
    /// Discard the attempt count and return the last error.
    pub fn into_inner(self) -> E {
        self.error
    }
}

/// A strategy for retrying failed operations with backoff.
///
/// Implementations only decide *how long* to wait and *how many* retries are
/// allowed. Which errors are worth retrying is decided by the caller through
/// the predicate passed to [`retry_if`](BackoffStrategy::retry_if), since only
/// the caller knows whether a failed request may already have reached the
/// server.
///
/// # Examples
///
/// ```rust
/// use pushlink_core::retry::{BackoffStrategy, ExponentialBackoff};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backoff = ExponentialBackoff::immediate(2);
/// let calls = Arc::new(AtomicU32::new(0));
///
/// let result = backoff
///     .retry_if(
///         |_state| {
///             let calls = Arc::clone(&calls);
///             async move {
///                 if calls.fetch_add(1, Ordering::SeqCst) < 2 {
///                     Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))
///                 } else {
///                     Ok("delivered")
///                 }
///             }
///         },
///         |error, _state| error.kind() == std::io::ErrorKind::TimedOut,
///     )
///     .await?;
///
/// assert_eq!(result, "delivered");
/// assert_eq!(calls.load(Ordering::SeqCst), 3);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait BackoffStrategy: Send + Sync {
    /// Calculate the delay before the next retry.
    ///
    /// `retry` is 0 for the delay before the first retry, 1 before the
    /// second, and so on. `None` means no wait.
    fn next_delay(&self, retry: u32) -> Option<Duration>;

    /// Maximum number of retries after the initial attempt.
    fn max_retries(&self) -> u32;

    /// Default retry predicate used by [`execute`](BackoffStrategy::execute).
    ///
    /// Returns `true` for every error.
    fn should_retry(&self, error: &dyn StdError, retry: u32) -> bool {
        let _ = (error, retry);
        true
    }

    /// Run `operation` until it succeeds, `predicate` rejects its error, or
    /// the retry limit is reached.
    ///
    /// The operation receives the [`RetryState`] of the attempt it is running
    /// as. On failure the returned [`Exhausted`] carries the last error and
    /// the number of attempts made.
    async fn retry_if<F, Fut, T, E, P>(
        &self,
        mut operation: F,
        predicate: P,
    ) -> Result<T, Exhausted<E>>
    where
        F: FnMut(RetryState) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: StdError + Send + Sync + 'static,
        P: Fn(&E, &RetryState) -> bool + Send + Sync,
    {
        let mut state = RetryState::new(self.max_retries());
        loop {
            state.record_attempt();
            match operation(state).await {
                Ok(value) => return Ok(value),
                Err(error) if !predicate(&error, &state) || !state.can_retry() => {
                    return Err(Exhausted {
                        error,
                        attempts: state.attempts(),
                    });
                }
                Err(error) => {
                    let delay = self.next_delay(state.retries()).unwrap_or(Duration::ZERO);
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        attempt = state.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "retrying after error: {error}"
                    );
                    drop(error);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    /// Run `operation` with [`should_retry`](BackoffStrategy::should_retry)
    /// as the predicate and return the last error unwrapped.
    async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: StdError + Send + Sync + 'static,
    {
        self.retry_if(
            |_| operation(),
            |error, state| self.should_retry(error, state.retries()),
        )
        .await
        .map_err(Exhausted::into_inner)
    }
}
