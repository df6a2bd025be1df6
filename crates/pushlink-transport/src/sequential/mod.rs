//! Sequential transport
//!
//! One request per connection. Connect-phase timeouts are retried with
//! backoff; read-phase timeouts and other I/O failures end the call.

mod exchange;
mod upload;

pub use exchange::{Exchange, ReqwestExchange};
pub use upload::{UPLOAD_CHUNK_SIZE, content_type_for};

use crate::classifier::classify;
use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::proxy::ProxyConfig;
use crate::request::{ConnectionStyle, HttpRequestSpec, RequestHeaders};
use crate::response::ResponseWrapper;
use crate::retry::RetryPolicy;
use crate::tls::TrustPolicy;
use crate::traits::Transport;
use async_trait::async_trait;
use http::Method;
use std::sync::Arc;
use tracing::debug;

/// Transport that sends each request over its own connection.
#[derive(Clone)]
pub struct SequentialTransport {
    exchange: Arc<dyn Exchange>,
    client: reqwest::Client,
    headers: RequestHeaders,
    retry_policy: RetryPolicy,
}

impl std::fmt::Debug for SequentialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialTransport")
            .field("headers", &self.headers)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl SequentialTransport {
    /// Create a new builder.
    pub fn builder() -> SequentialTransportBuilder {
        SequentialTransportBuilder::default()
    }

    /// The retry policy applied to connect-phase timeouts.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Send a prepared request and classify the response without turning
    /// error statuses into errors.
    pub async fn execute(&self, request: &HttpRequestSpec) -> Result<ResponseWrapper> {
        debug!("Send request - {} {}", request.method(), request.url());
        if let Some(body) = request.body() {
            debug!("Request Content - {}", String::from_utf8_lossy(body));
        }

        let raw = self
            .retry_policy
            .run(|_| self.exchange.exchange(request))
            .await?;

        Ok(classify(raw.status, raw.body, &raw.headers))
    }

    pub(crate) fn build_request(
        &self,
        method: Method,
        url: &str,
        content: Option<&str>,
    ) -> Result<HttpRequestSpec> {
        HttpRequestSpec::builder(method, url)
            .maybe_body(content.map(str::to_owned))
            .build(&self.headers, ConnectionStyle::Sequential)
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn headers(&self) -> &RequestHeaders {
        &self.headers
    }
}

#[async_trait]
impl Transport for SequentialTransport {
    async fn send(
        &self,
        method: Method,
        url: &str,
        content: Option<&str>,
    ) -> Result<ResponseWrapper> {
        let request = self.build_request(method, url, content)?;
        self.execute(&request).await?.into_result()
    }
}

/// Builder for [`SequentialTransport`].
#[derive(Default)]
pub struct SequentialTransportBuilder {
    authorization: Option<String>,
    config: TransportConfig,
    trust_policy: Option<TrustPolicy>,
    proxy: Option<ProxyConfig>,
    retry_policy: Option<RetryPolicy>,
    exchange: Option<Arc<dyn Exchange>>,
}

impl SequentialTransportBuilder {
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

    /// Route connections through a proxy.
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Override the retry policy derived from `max_retry_times`.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Replace the reqwest-backed exchange.
    pub fn exchange(mut self, exchange: Arc<dyn Exchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// Build the transport.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::MissingConfig`] without an authorization
    /// value or trust policy, and [`TransportError::InvalidConfig`] when the
    /// configuration does not validate.
    pub fn build(self) -> Result<SequentialTransport> {
        let authorization = self
            .authorization
            .ok_or(TransportError::MissingConfig("authorization"))?;
        let trust_policy = self
            .trust_policy
            .ok_or(TransportError::MissingConfig("trust_policy"))?;
        self.config.validate()?;

        let reqwest_exchange =
            ReqwestExchange::new(&self.config, &trust_policy, self.proxy.as_ref())?;
        let client = reqwest_exchange.client().clone();
        let exchange = self
            .exchange
            .unwrap_or_else(|| Arc::new(reqwest_exchange));

        let retry_policy = self
            .retry_policy
            .unwrap_or_else(|| RetryPolicy::with_max_retries(self.config.max_retry_times));

        debug!(
            ssl_version = %self.config.ssl_version,
            max_retry_times = retry_policy.max_retry_times(),
            encrypt_type = %self.config.encrypt_type,
            "Created sequential transport"
        );

        Ok(SequentialTransport {
            exchange,
            client,
            headers: RequestHeaders::new(authorization).with_encrypt_type(self.config.encrypt_type),
            retry_policy,
        })
    }
}
