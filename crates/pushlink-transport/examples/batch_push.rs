//! Batch push example
//!
//! Queues a few requests on the multiplexed transport, flushes them over one
//! HTTP/2 connection and then sends a single request on the sequential
//! transport.
//!
//! ## Usage
//!
//! ```bash
//! export PUSHLINK_BASE_URL=https://api.example.com
//! export PUSHLINK_AUTHORIZATION="Basic <base64 app key:secret>"
//! RUST_LOG=pushlink_transport=debug cargo run -p pushlink-transport --example batch_push
//! ```

use http::Method;
use pushlink_transport::{
    MultiplexedTransport, ResponseWrapper, SequentialTransport, Transport, TransportConfig,
    TrustPolicy,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let base_url = std::env::var("PUSHLINK_BASE_URL")?;
    let authorization = std::env::var("PUSHLINK_AUTHORIZATION")?;
    let config = TransportConfig::from_env();

    let multiplexed = MultiplexedTransport::builder(base_url.as_str())
        .authorization(authorization.as_str())
        .trust_policy(TrustPolicy::WebPki)
        .config(config.clone())
        .build()?;

    for alias in ["alice", "bob", "carol"] {
        let body = format!(r#"{{"platform":"all","audience":{{"alias":["{alias}"]}}}}"#);
        multiplexed.enqueue(Method::POST, &format!("{base_url}/v3/push"), Some(&body))?;
    }

    let report = |response: &ResponseWrapper| {
        println!(
            "{} {} (remaining quota: {:?})",
            response.status(),
            response.body().unwrap_or_default(),
            response.rate_limit_remaining()
        );
    };
    let responses = multiplexed.execute(Some(&report)).await?;
    println!("Flushed {} requests", responses.len());

    let sequential = SequentialTransport::builder()
        .authorization(authorization)
        .trust_policy(TrustPolicy::WebPki)
        .config(config)
        .build()?;
    let response = sequential.send_get(&format!("{base_url}/v3/report/received")).await?;
    println!("Report: {}", response.body().unwrap_or_default());

    Ok(())
}
