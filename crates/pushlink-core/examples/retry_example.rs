//! Example: retrying only connect-phase failures
//!
//! Simulates a service whose first connection attempts time out, and shows
//! that a read timeout is never retried.
//!
//! Run with:
//! ```bash
//! cargo run -p pushlink-core --example retry_example
//! ```

use pushlink_core::prelude::*;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// A simulated endpoint that refuses to accept connections for a while.
struct FlakyEndpoint {
    attempts: Arc<AtomicU32>,
    connect_failures: u32,
    read_timeout: bool,
}

impl FlakyEndpoint {
    fn new(connect_failures: u32) -> Self {
        Self {
            attempts: Arc::new(AtomicU32::new(0)),
            connect_failures,
            read_timeout: false,
        }
    }

    fn with_read_timeout(mut self) -> Self {
        self.read_timeout = true;
        self
    }

    async fn call(&self) -> Result<String, io::Error> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if attempt <= self.connect_failures {
            println!("  attempt {attempt}: connect timed out");
            return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"));
        }
        if self.read_timeout {
            println!("  attempt {attempt}: read timed out");
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "read timed out"));
        }
        println!("  attempt {attempt}: 200 OK");
        Ok(r#"{"sendno":"0","msg_id":"1"}"#.to_string())
    }
}

fn connect_phase(error: &io::Error, _state: &RetryState) -> bool {
    error.kind() == io::ErrorKind::TimedOut
}

#[tokio::main]
async fn main() {
    let backoff = ExponentialBackoff::builder()
        .max_retries(3)
        .initial_delay(Duration::from_millis(50))
        .jitter(0.1)
        .build();

    println!("Two connect timeouts, then success:");
    let endpoint = FlakyEndpoint::new(2);
    let started = Instant::now();
    match backoff.retry_if(|_| endpoint.call(), connect_phase).await {
        Ok(body) => println!("  -> {body} after {:?}\n", started.elapsed()),
        Err(exhausted) => println!("  -> failed: {exhausted}\n"),
    }

    println!("Connect timeouts beyond the limit:");
    let endpoint = FlakyEndpoint::new(10);
    if let Err(exhausted) = backoff.retry_if(|_| endpoint.call(), connect_phase).await {
        println!("  -> {exhausted}\n");
    }

    println!("Read timeout is not retried:");
    let endpoint = FlakyEndpoint::new(0).with_read_timeout();
    if let Err(exhausted) = backoff.retry_if(|_| endpoint.call(), connect_phase).await {
        println!("  -> {exhausted}");
    }
}
