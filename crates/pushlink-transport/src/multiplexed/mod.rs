//! Multiplexed transport
//!
//! Requests are queued and flushed together over one shared HTTP/2
//! connection. Each flush cycle numbers its streams 3, 5, 7, ... and waits
//! for them in that order.

mod connection;
mod table;

pub use connection::{H2Connection, H2Connector, MuxConnection, MuxConnector};
pub use table::{
    ResponseCompletion, StreamCompleter, StreamEntry, StreamOutcome, StreamTable, WriteCompletion,
};

use crate::classifier::classify;
use crate::config::TransportConfig;
use crate::error::{ConnectionFailure, Result, TransportError};
use crate::proxy::ProxyConfig;
use crate::request::{ConnectionStyle, HttpRequestSpec, RequestHeaders};
use crate::response::ResponseWrapper;
use crate::tls::TrustPolicy;
use crate::traits::Transport;
use async_trait::async_trait;
use futures::StreamExt;
use http::Method;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;
use url::Url;

/// First logical stream id of every flush cycle.
pub const FIRST_STREAM_ID: u32 = 3;

/// Callback invoked once per delivered response, in stream-id order.
pub type OnSuccess<'a> = &'a (dyn Fn(&ResponseWrapper) + Send + Sync);

/// Transport that flushes queued requests over one shared connection.
pub struct MultiplexedTransport {
    base_url: Url,
    connector: Arc<dyn MuxConnector>,
    // Held for a whole flush cycle; serializes `execute`.
    connection: tokio::sync::Mutex<Option<Box<dyn MuxConnection>>>,
    queue: Mutex<VecDeque<HttpRequestSpec>>,
    table: StreamTable,
    headers: RequestHeaders,
    config: TransportConfig,
}

impl std::fmt::Debug for MultiplexedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexedTransport")
            .field("base_url", &self.base_url.as_str())
            .field("queued", &self.queued())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MultiplexedTransport {
    /// Create a builder for requests against `base_url`.
    pub fn builder(base_url: impl Into<String>) -> MultiplexedTransportBuilder {
        MultiplexedTransportBuilder {
            base_url: base_url.into(),
            authorization: None,
            config: TransportConfig::default(),
            trust_policy: None,
            proxy: None,
            connector: None,
        }
    }

    /// Number of requests waiting for the next flush.
    pub fn queued(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Queue a request for the next [`execute`](Self::execute).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::QueueOverflow`] when the queue is full.
    /// Nothing is sent.
    pub fn enqueue(&self, method: Method, url: &str, content: Option<&str>) -> Result<()> {
        let request = self.build_request(method, url, content)?;
        self.enqueue_request(request)
    }

    /// Queue an already built request.
    pub fn enqueue_request(&self, request: HttpRequestSpec) -> Result<()> {
        self.check_target(&request)?;

        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.len() >= self.config.queue_capacity {
            return Err(TransportError::QueueOverflow {
                capacity: self.config.queue_capacity,
            });
        }
        queue.push_back(request);
        Ok(())
    }

    /// Flush every queued request over the shared connection.
    ///
    /// Returns one classified response per request, in enqueue order; error
    /// statuses are not turned into errors here. `on_success` is invoked for
    /// each response as it is drained. The connection is closed when the
    /// cycle ends, whatever its outcome.
    pub async fn execute(&self, on_success: Option<OnSuccess<'_>>) -> Result<Vec<ResponseWrapper>> {
        let mut connection = self.connection.lock().await;
        let batch: Vec<HttpRequestSpec> = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        self.flush(&mut connection, batch, on_success).await
    }

    async fn flush(
        &self,
        slot: &mut Option<Box<dyn MuxConnection>>,
        batch: Vec<HttpRequestSpec>,
        on_success: Option<OnSuccess<'_>>,
    ) -> Result<Vec<ResponseWrapper>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let result = self.run_cycle(slot, &batch, on_success).await;

        self.table.clear();
        if let Some(mut connection) = slot.take() {
            connection.close().await;
        }
        result
    }

    async fn run_cycle(
        &self,
        slot: &mut Option<Box<dyn MuxConnection>>,
        batch: &[HttpRequestSpec],
        on_success: Option<OnSuccess<'_>>,
    ) -> Result<Vec<ResponseWrapper>> {
        let connection = self.ensure_connected(slot).await?;

        let mut stream_id = FIRST_STREAM_ID;
        for request in batch {
            let entry = connection.dispatch(stream_id, request)?;
            self.table.register(stream_id, entry)?;
            debug!(stream_id, "Sending request - {} {}", request.method(), request.url());
            stream_id += 2;
        }

        let mut responses = Vec::with_capacity(batch.len());
        let drain = self.table.drain_in_order(self.config.stream_timeout);
        futures::pin_mut!(drain);
        while let Some((stream_id, outcome)) = drain.next().await {
            let raw = outcome.into_result(stream_id)?;
            debug!(stream_id, status = raw.status, "Received response");
            let response = classify(raw.status, raw.body, &raw.headers);
            if let Some(callback) = on_success {
                callback(&response);
            }
            responses.push(response);
        }
        Ok(responses)
    }

    async fn ensure_connected<'s>(
        &self,
        slot: &'s mut Option<Box<dyn MuxConnection>>,
    ) -> Result<&'s mut Box<dyn MuxConnection>> {
        if !slot.as_ref().is_some_and(|connection| connection.is_open()) {
            if let Some(mut stale) = slot.take() {
                debug!("Shared connection is closed, reconnecting");
                stale.close().await;
            }
            *slot = Some(self.connect().await?);
        }
        slot.as_mut()
            .ok_or_else(|| TransportError::Protocol("no shared connection".into()))
    }

    async fn connect(&self) -> Result<Box<dyn MuxConnection>> {
        let timeout = self.config.connection_request_timeout;
        let mut connection = tokio::time::timeout(timeout, self.connector.connect())
            .await
            .map_err(|_| {
                TransportError::connection(
                    ConnectionFailure::ConnectTimeout,
                    1,
                    format!("connection to {} not established within {timeout:?}", self.base_url),
                )
            })??;

        let settings_timeout = self.config.settings_timeout;
        let ready = tokio::time::timeout(settings_timeout, connection.ready()).await;
        match ready {
            Ok(Ok(())) => Ok(connection),
            Ok(Err(e)) => {
                connection.close().await;
                Err(e)
            }
            Err(_) => {
                connection.close().await;
                Err(TransportError::HandshakeTimeout(settings_timeout))
            }
        }
    }

    fn build_request(
        &self,
        method: Method,
        url: &str,
        content: Option<&str>,
    ) -> Result<HttpRequestSpec> {
        HttpRequestSpec::builder(method, url)
            .maybe_body(content.map(str::to_owned))
            .build(&self.headers, ConnectionStyle::Multiplexed)
    }

    fn check_target(&self, request: &HttpRequestSpec) -> Result<()> {
        let url = request.url();
        if url.scheme() == self.base_url.scheme()
            && url.host_str() == self.base_url.host_str()
            && url.port_or_known_default() == self.base_url.port_or_known_default()
        {
            Ok(())
        } else {
            Err(TransportError::InvalidRequest(format!(
                "{url} is not served by {}",
                self.base_url
            )))
        }
    }
}

#[async_trait]
impl Transport for MultiplexedTransport {
    /// Send one request in its own flush cycle; the shared queue is left
    /// untouched.
    async fn send(
        &self,
        method: Method,
        url: &str,
        content: Option<&str>,
    ) -> Result<ResponseWrapper> {
        let request = self.build_request(method, url, content)?;
        self.check_target(&request)?;

        let mut connection = self.connection.lock().await;
        let mut responses = self.flush(&mut connection, vec![request], None).await?;
        responses
            .pop()
            .ok_or_else(|| TransportError::Protocol("no response for request".into()))?
            .into_result()
    }
}

/// Builder for [`MultiplexedTransport`].
pub struct MultiplexedTransportBuilder {
    base_url: String,
    authorization: Option<String>,
    config: TransportConfig,
    trust_policy: Option<TrustPolicy>,
    proxy: Option<ProxyConfig>,
    connector: Option<Arc<dyn MuxConnector>>,
}

impl MultiplexedTransportBuilder {
    /// Set the `Authorization` header value.
    pub fn authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }

    /// Set the transport configuration.
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Set how server certificates are verified. Required.
    pub fn trust_policy(mut self, policy: TrustPolicy) -> Self {
        self.trust_policy = Some(policy);
        self
    }

    /// Tunnel the connection through a proxy.
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Replace the HTTP/2 connector.
    pub fn connector(mut self, connector: Arc<dyn MuxConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Build the transport. No connection is opened until the first flush.
    pub fn build(self) -> Result<MultiplexedTransport> {
        let authorization = self
            .authorization
            .ok_or(TransportError::MissingConfig("authorization"))?;
        let trust_policy = self
            .trust_policy
            .ok_or(TransportError::MissingConfig("trust_policy"))?;
        self.config.validate()?;

        let base_url = Url::parse(&self.base_url)?;
        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(H2Connector::new(
                &base_url,
                &self.config,
                &trust_policy,
                self.proxy,
            )?),
        };

        debug!(
            base_url = %base_url,
            queue_capacity = self.config.queue_capacity,
            stream_timeout = ?self.config.stream_timeout,
            "Created multiplexed transport"
        );

        Ok(MultiplexedTransport {
            base_url,
            connector,
            connection: tokio::sync::Mutex::new(None),
            queue: Mutex::new(VecDeque::new()),
            table: StreamTable::new(),
            headers: RequestHeaders::new(authorization)
                .with_encrypt_type(self.config.encrypt_type.clone()),
            config: self.config,
        })
    }
}
