//! Transport trait
//!
//! The contract the SDK's device, push, report and schedule clients are
//! written against. Both delivery models implement it.

use crate::error::Result;
use crate::response::ResponseWrapper;
use async_trait::async_trait;
use http::Method;

/// Generic transport trait for the sequential and multiplexed models.
///
/// Every method returns the classified response for 2xx and 3xx statuses
/// and [`TransportError::Request`](crate::TransportError::Request) for 4xx
/// and 5xx statuses.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request with an optional JSON body.
    async fn send(&self, method: Method, url: &str, content: Option<&str>)
    -> Result<ResponseWrapper>;

    /// Send a GET request.
    async fn send_get(&self, url: &str) -> Result<ResponseWrapper> {
        self.send(Method::GET, url, None).await
    }

    /// Send a GET request carrying a JSON body.
    async fn send_get_with_body(&self, url: &str, content: &str) -> Result<ResponseWrapper> {
        self.send(Method::GET, url, Some(content)).await
    }

    /// Send a POST request with a JSON body.
    async fn send_post(&self, url: &str, content: &str) -> Result<ResponseWrapper> {
        self.send(Method::POST, url, Some(content)).await
    }

    /// Send a PUT request with a JSON body.
    async fn send_put(&self, url: &str, content: &str) -> Result<ResponseWrapper> {
        self.send(Method::PUT, url, Some(content)).await
    }

    /// Send a DELETE request.
    async fn send_delete(&self, url: &str) -> Result<ResponseWrapper> {
        self.send(Method::DELETE, url, None).await
    }

    /// Send a DELETE request carrying a JSON body.
    async fn send_delete_with_body(&self, url: &str, content: &str) -> Result<ResponseWrapper> {
        self.send(Method::DELETE, url, Some(content)).await
    }
}
