//! Blocking wrapper around [`SequentialTransport`].
//!
//! Each call runs on a private current-thread runtime, so this type must not
//! be used from inside an async context.

use crate::error::Result;
use crate::response::ResponseWrapper;
use crate::sequential::{SequentialTransport, SequentialTransportBuilder};
use crate::traits::Transport;
use http::Method;
use std::path::Path;
use tokio::runtime::{Builder, Runtime};

/// Synchronous sequential transport.
#[derive(Debug)]
pub struct BlockingSequentialTransport {
    inner: SequentialTransport,
    runtime: Runtime,
}

impl BlockingSequentialTransport {
    /// Build the transport and its runtime.
    pub fn new(builder: SequentialTransportBuilder) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let inner = builder.build()?;
        Ok(Self { inner, runtime })
    }

    /// The async transport underneath.
    pub fn inner(&self) -> &SequentialTransport {
        &self.inner
    }

    /// Send a request with an optional JSON body.
    pub fn send(&self, method: Method, url: &str, content: Option<&str>) -> Result<ResponseWrapper> {
        self.runtime.block_on(self.inner.send(method, url, content))
    }

    /// Send a GET request.
    pub fn send_get(&self, url: &str) -> Result<ResponseWrapper> {
        self.send(Method::GET, url, None)
    }

    /// Send a GET request carrying a JSON body.
    pub fn send_get_with_body(&self, url: &str, content: &str) -> Result<ResponseWrapper> {
        self.send(Method::GET, url, Some(content))
    }

    /// Send a POST request with a JSON body.
    pub fn send_post(&self, url: &str, content: &str) -> Result<ResponseWrapper> {
        self.send(Method::POST, url, Some(content))
    }

    /// Send a PUT request with a JSON body.
    pub fn send_put(&self, url: &str, content: &str) -> Result<ResponseWrapper> {
        self.send(Method::PUT, url, Some(content))
    }

    /// Send a DELETE request.
    pub fn send_delete(&self, url: &str) -> Result<ResponseWrapper> {
        self.send(Method::DELETE, url, None)
    }

    /// Send a DELETE request carrying a JSON body.
    pub fn send_delete_with_body(&self, url: &str, content: &str) -> Result<ResponseWrapper> {
        self.send(Method::DELETE, url, Some(content))
    }

    /// Upload a multipart form with POST.
    pub fn form_upload_by_post(
        &self,
        url: &str,
        text_fields: &[(&str, &str)],
        file_fields: &[(&str, &Path)],
    ) -> Result<ResponseWrapper> {
        self.runtime
            .block_on(self.inner.form_upload_by_post(url, text_fields, file_fields))
    }

    /// Upload a multipart form with PUT.
    pub fn form_upload_by_put(
        &self,
        url: &str,
        text_fields: &[(&str, &str)],
        file_fields: &[(&str, &Path)],
    ) -> Result<ResponseWrapper> {
        self.runtime
            .block_on(self.inner.form_upload_by_put(url, text_fields, file_fields))
    }
}
