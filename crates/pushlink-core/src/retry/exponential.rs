//! Exponential backoff with jitter.

use super::strategy::BackoffStrategy;
use std::time::Duration;

/// Exponential backoff strategy with configurable jitter.
///
/// The delay before retry `n` (0-indexed) is:
///
/// ```text
/// base   = initial_delay * multiplier^n
/// jitter = base * jitter * random(-1.0, +1.0)
/// delay  = min(base + jitter, max_delay)
/// ```
///
/// An `initial_delay` of zero turns every delay into zero, which is how the
/// transports express "retry immediately".
///
/// # Examples
///
/// ```rust
/// use pushlink_core::retry::{BackoffStrategy, ExponentialBackoff};
/// use std::time::Duration;
///
/// let backoff = ExponentialBackoff::builder()
///     .max_retries(5)
///     .initial_delay(Duration::from_millis(100))
///     .max_delay(Duration::from_secs(2))
///     .jitter(0.0)
///     .build();
///
/// assert_eq!(backoff.next_delay(1), Some(Duration::from_millis(200)));
/// assert_eq!(backoff.max_retries(), 5);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a new builder for configuring exponential backoff.
    pub fn builder() -> ExponentialBackoffBuilder {
        ExponentialBackoffBuilder::default()
    }

    /// Retry up to `max_retries` times without waiting in between.
    pub fn immediate(max_retries: u32) -> Self {
        Self::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::ZERO)
            .jitter(0.0)
            .build()
    }

    /// Delay before the first retry.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Upper bound applied to every delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl Default for ExponentialBackoff {
    /// Defaults: 3 retries, 100ms initial delay, 60s cap, doubling, 10% jitter.
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn next_delay(&self, retry: u32) -> Option<Duration> {
        if self.initial_delay.is_zero() {
            return Some(Duration::ZERO);
        }

        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        let jittered = if self.jitter > 0.0 {
            base + base * self.jitter * (rand::random::<f64>() - 0.5) * 2.0
        } else {
            base
        };

        let capped = jittered.min(self.max_delay.as_secs_f64()).max(0.0);
        Some(Duration::from_secs_f64(capped))
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Builder for [`ExponentialBackoff`].
///
/// Unset parameters fall back to: 3 retries, 100ms initial delay, 60s cap,
/// multiplier 2.0, jitter 0.1.
#[derive(Debug, Default)]
pub struct ExponentialBackoffBuilder {
    max_retries: Option<u32>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
}

impl ExponentialBackoffBuilder {
    /// Set the maximum number of retries after the first attempt.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the exponential multiplier. Values below 1.0 are raised to 1.0.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier.max(1.0));
        self
    }

    /// Set the jitter factor, clamped to `0.0..=1.0`.
    ///
    /// A jitter of 0.1 lets each delay vary by ±10%.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter.clamp(0.0, 1.0));
        self
    }

    /// Build the `ExponentialBackoff` instance.
    pub fn build(self) -> ExponentialBackoff {
        ExponentialBackoff {
            max_retries: self.max_retries.unwrap_or(3),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(100)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(60)),
            multiplier: self.multiplier.unwrap_or(2.0),
            jitter: self.jitter.unwrap_or(0.1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Exhausted;
    use proptest::prelude::*;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn connect_timeout() -> io::Error {
        io::Error::new(io::ErrorKind::TimedOut, "connect timed out")
    }

    fn read_timeout() -> io::Error {
        io::Error::new(io::ErrorKind::WouldBlock, "read timed out")
    }

    fn is_connect_timeout(error: &io::Error, _state: &crate::retry::RetryState) -> bool {
        error.kind() == io::ErrorKind::TimedOut
    }

    #[test]
    fn test_exponential_delay_calculation() {
        let backoff = ExponentialBackoff::builder()
            .max_retries(5)
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(10))
            .jitter(0.0)
            .build();

        assert_eq!(backoff.next_delay(0), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(1), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(2), Some(Duration::from_millis(400)));
        assert_eq!(backoff.next_delay(3), Some(Duration::from_millis(800)));
    }

    #[test]
    fn test_max_delay_cap() {
        let backoff = ExponentialBackoff::builder()
            .max_retries(100)
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(5))
            .multiplier(10.0)
            .jitter(0.0)
            .build();

        for retry in 5..10 {
            assert_eq!(backoff.next_delay(retry), Some(Duration::from_secs(5)));
        }
    }

    #[test]
    fn test_immediate_never_waits() {
        let backoff = ExponentialBackoff::immediate(3);
        assert_eq!(backoff.max_retries(), 3);
        for retry in 0..5 {
            assert_eq!(backoff.next_delay(retry), Some(Duration::ZERO));
        }
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = ExponentialBackoff::builder()
            .initial_delay(Duration::from_secs(1))
            .jitter(0.5)
            .build();

        for _ in 0..20 {
            let millis = backoff.next_delay(0).unwrap().as_millis();
            assert!(
                (500..=1500).contains(&millis),
                "delay with 50% jitter out of range: {}ms",
                millis
            );
        }
    }

    #[test]
    fn test_builder_defaults_and_clamping() {
        let backoff = ExponentialBackoff::default();
        assert_eq!(backoff.max_retries(), 3);
        assert_eq!(backoff.initial_delay(), Duration::from_millis(100));
        assert_eq!(backoff.max_delay(), Duration::from_secs(60));

        let clamped = ExponentialBackoff::builder()
            .jitter(2.0)
            .multiplier(0.5)
            .build();
        assert_eq!(clamped.jitter, 1.0);
        assert_eq!(clamped.multiplier, 1.0);
    }

    #[tokio::test]
    async fn test_success_after_two_connect_timeouts() {
        let backoff = ExponentialBackoff::immediate(2);
        let attempts = Arc::new(AtomicU32::new(0));

        let result = backoff
            .retry_if(
                |_| {
                    let attempts = Arc::clone(&attempts);
                    async move {
                        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(connect_timeout())
                        } else {
                            Ok("delivered")
                        }
                    }
                },
                is_connect_timeout,
            )
            .await;

        assert_eq!(result.unwrap(), "delivered");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_reports_attempts() {
        let backoff = ExponentialBackoff::immediate(3);

        let result: Result<(), Exhausted<io::Error>> = backoff
            .retry_if(|_| async { Err(connect_timeout()) }, is_connect_timeout)
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 4);
        assert_eq!(exhausted.error.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_rejected_error_is_not_retried() {
        let backoff = ExponentialBackoff::immediate(5);
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = backoff
            .retry_if(
                |_| {
                    let attempts = Arc::clone(&attempts);
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err(read_timeout())
                    }
                },
                is_connect_timeout,
            )
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let backoff = ExponentialBackoff::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(100))
            .jitter(0.0)
            .build();
        let started = tokio::time::Instant::now();

        let result: Result<(), _> = backoff
            .retry_if(|_| async { Err(connect_timeout()) }, is_connect_timeout)
            .await;

        assert_eq!(result.unwrap_err().attempts, 3);
        // 100ms before the first retry, 200ms before the second.
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_execute_uses_default_predicate() {
        let backoff = ExponentialBackoff::immediate(1);
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<(), io::Error> = backoff
            .execute(|| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(io::Error::other("always fails"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    proptest! {
        #[test]
        fn prop_attempts_never_exceed_limit(max_retries in 0u32..8, failures in 0u32..12) {
            let backoff = ExponentialBackoff::immediate(max_retries);
            let attempts = Arc::new(AtomicU32::new(0));

            let result = tokio_test::block_on(backoff.retry_if(
                |_| {
                    let attempts = Arc::clone(&attempts);
                    async move {
                        if attempts.fetch_add(1, Ordering::SeqCst) < failures {
                            Err(connect_timeout())
                        } else {
                            Ok(())
                        }
                    }
                },
                is_connect_timeout,
            ));

            let made = attempts.load(Ordering::SeqCst);
            prop_assert!(made <= max_retries + 1);
            match result {
                Ok(()) => prop_assert_eq!(made, failures + 1),
                Err(exhausted) => {
                    prop_assert_eq!(exhausted.attempts, max_retries + 1);
                    prop_assert_eq!(made, max_retries + 1);
                }
            }
        }
    }
}
