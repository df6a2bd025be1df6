//! Retry strategies and backoff implementations.
//!
//! # Key Types
//!
//! - [`BackoffStrategy`] - when to try again and how long to wait first
//! - [`ExponentialBackoff`] - exponential backoff with jitter
//! - [`RetryState`] - attempt counter for a single logical call
//! - [`Exhausted`] - the error that ended a retry loop
//!
//! # Examples
//!
//! ```rust
//! use pushlink_core::retry::{BackoffStrategy, ExponentialBackoff};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Retry immediately, up to three times, like the sequential transport does
//! // for connect timeouts.
//! let backoff = ExponentialBackoff::immediate(3);
//!
//! let result = backoff
//!     .execute(|| async { Ok::<_, std::io::Error>("sent") })
//!     .await?;
//! assert_eq!(result, "sent");
//! # Ok(())
//! # }
//! ```

mod exponential;
mod strategy;

pub use exponential::{ExponentialBackoff, ExponentialBackoffBuilder};
pub use strategy::{BackoffStrategy, Exhausted, RetryState};
