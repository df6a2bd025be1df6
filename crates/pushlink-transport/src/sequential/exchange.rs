//! A single request/response exchange over a fresh connection.

use crate::config::TransportConfig;
use crate::error::{ConnectionFailure, Result, TransportError};
use crate::proxy::ProxyConfig;
use crate::request::HttpRequestSpec;
use crate::response::RawResponse;
use crate::tls::{self, ALPN_HTTP11, TrustPolicy};
use async_trait::async_trait;
use tracing::debug;

/// One attempt at sending a request and reading its response.
///
/// Implementations report connect-phase timeouts as
/// [`ConnectionFailure::ConnectTimeout`] so the caller can retry them, and
/// read-phase timeouts as [`ConnectionFailure::ReadTimeout`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Send `request` and read the full response.
    async fn exchange(&self, request: &HttpRequestSpec) -> Result<RawResponse>;
}

/// [`Exchange`] backed by a reqwest client.
///
/// Connections are not pooled, so every exchange opens its own connection
/// and drops it when the body has been read. Redirects are not followed.
#[derive(Debug, Clone)]
pub struct ReqwestExchange {
    client: reqwest::Client,
}

impl ReqwestExchange {
    /// Build the client from the transport configuration.
    pub fn new(
        config: &TransportConfig,
        trust: &TrustPolicy,
        proxy: Option<&ProxyConfig>,
    ) -> Result<Self> {
        let tls = tls::client_config(trust, &config.ssl_version, &[ALPN_HTTP11])?;

        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connection_timeout)
            .read_timeout(config.read_timeout)
            .pool_max_idle_per_host(0)
            .redirect(reqwest::redirect::Policy::none())
            .http1_only()
            .use_preconfigured_tls(tls);

        builder = match proxy {
            Some(proxy) => builder.proxy(proxy.to_reqwest()?),
            None => builder.no_proxy(),
        };

        let client = builder
            .build()
            .map_err(|e| TransportError::InvalidConfig(format!("HTTP client: {e}")))?;

        debug!(
            connect_timeout = ?config.connection_timeout,
            read_timeout = ?config.read_timeout,
            proxy = ?proxy.map(ProxyConfig::url),
            "Created sequential HTTP client"
        );

        Ok(Self { client })
    }

    /// The underlying reqwest client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Exchange for ReqwestExchange {
    async fn exchange(&self, request: &HttpRequestSpec) -> Result<RawResponse> {
        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        read_response(response).await
    }
}

/// Read status, headers and body of a reqwest response.
pub(crate) async fn read_response(response: reqwest::Response) -> Result<RawResponse> {
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response.text().await.map_err(map_reqwest_error)?;
    Ok(RawResponse::new(status, headers, body))
}

/// Sort a reqwest failure into connect timeout, read timeout or I/O error.
pub(crate) fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    let reason = if error.is_connect() && error.is_timeout() {
        ConnectionFailure::ConnectTimeout
    } else if error.is_timeout() {
        ConnectionFailure::ReadTimeout
    } else {
        ConnectionFailure::Io
    };
    TransportError::connection(reason, 1, error.to_string())
}
