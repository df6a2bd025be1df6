#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Retry primitives shared by the pushlink transports.
//!
//! The transports only ever retry a request whose connection could not be
//! established in time. Everything needed to express that lives here:
//!
//! - [`BackoffStrategy`](retry::BackoffStrategy): how long to wait and how
//!   many times to try again
//! - [`ExponentialBackoff`](retry::ExponentialBackoff): the default strategy,
//!   with jitter
//! - [`RetryState`](retry::RetryState): the per-call attempt counter
//! - [`Exhausted`](retry::Exhausted): the final error together with the
//!   number of attempts that were made
//!
//! # Examples
//!
//! ```rust
//! use pushlink_core::prelude::*;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backoff = ExponentialBackoff::builder()
//!     .max_retries(3)
//!     .initial_delay(Duration::from_millis(100))
//!     .build();
//!
//! let value = backoff
//!     .retry_if(
//!         |_state| async { Ok::<_, std::io::Error>(42) },
//!         |error, _state| error.kind() == std::io::ErrorKind::TimedOut,
//!     )
//!     .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

pub mod retry;

/// Convenient re-exports of commonly used items.
///
/// ```rust
/// use pushlink_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::retry::{
        BackoffStrategy, Exhausted, ExponentialBackoff, ExponentialBackoffBuilder, RetryState,
    };
}
