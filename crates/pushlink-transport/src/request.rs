//! Outbound request model and the fixed header set.

use crate::error::{Result, TransportError};
use bytes::Bytes;
use http::header::{
    ACCEPT_CHARSET, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HeaderName,
    HeaderValue, USER_AGENT as USER_AGENT_HEADER,
};
use http::{HeaderMap, Method};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("pushlink-rust/", env!("CARGO_PKG_VERSION"));

/// Payload encryption tag header.
pub const X_ENCRYPT_TYPE: HeaderName = HeaderName::from_static("x-encrypt-type");

const CHARSET: HeaderName = HeaderName::from_static("charset");
const JSON_CONTENT_TYPE: &str = "application/json";
const UTF_8: &str = "UTF-8";

/// Which connection model a request is built for.
///
/// HTTP/2 forbids connection-specific headers, so `Connection: Keep-Alive`
/// is only sent by the sequential transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStyle {
    /// One request per connection (HTTP/1.1)
    Sequential,
    /// Many streams over one connection (HTTP/2)
    Multiplexed,
}

/// Credentials and tags attached to every request.
#[derive(Debug, Clone)]
pub struct RequestHeaders {
    authorization: SecretString,
    encrypt_type: Option<String>,
}

impl RequestHeaders {
    /// Create a header set with the given `Authorization` value.
    pub fn new(authorization: impl Into<String>) -> Self {
        Self {
            authorization: SecretString::new(authorization.into().into_boxed_str()),
            encrypt_type: None,
        }
    }

    /// Set the `X-Encrypt-Type` value. An empty value omits the header.
    pub fn with_encrypt_type(mut self, encrypt_type: impl Into<String>) -> Self {
        let encrypt_type = encrypt_type.into();
        self.encrypt_type = (!encrypt_type.is_empty()).then_some(encrypt_type);
        self
    }

    /// The encryption tag, if any.
    pub fn encrypt_type(&self) -> Option<&str> {
        self.encrypt_type.as_deref()
    }

    /// Render the header map for one request.
    pub fn to_header_map(
        &self,
        style: ConnectionStyle,
        content_length: Option<usize>,
    ) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert(USER_AGENT_HEADER, HeaderValue::from_static(USER_AGENT));
        if style == ConnectionStyle::Sequential {
            headers.insert(CONNECTION, HeaderValue::from_static("Keep-Alive"));
        }
        headers.insert(ACCEPT_CHARSET, HeaderValue::from_static(UTF_8));
        headers.insert(CHARSET, HeaderValue::from_static(UTF_8));

        let mut authorization = HeaderValue::from_str(self.authorization.expose_secret())
            .map_err(|_| TransportError::InvalidRequest("invalid Authorization value".into()))?;
        authorization.set_sensitive(true);
        headers.insert(AUTHORIZATION, authorization);

        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        if let Some(length) = content_length {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        }

        if let Some(encrypt_type) = &self.encrypt_type {
            let value = HeaderValue::from_str(encrypt_type).map_err(|_| {
                TransportError::InvalidRequest(format!("invalid X-Encrypt-Type {encrypt_type:?}"))
            })?;
            headers.insert(X_ENCRYPT_TYPE, value);
        }

        Ok(headers)
    }
}

/// One outbound HTTP request. Immutable once built.
#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    method: Method,
    url: Url,
    body: Option<Bytes>,
    headers: HeaderMap,
}

impl HttpRequestSpec {
    /// Start building a request.
    pub fn builder(method: Method, url: impl Into<String>) -> HttpRequestSpecBuilder {
        HttpRequestSpecBuilder {
            method,
            url: url.into(),
            body: None,
        }
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request body.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Path and query, as sent in an HTTP/2 `:path`.
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }
}

/// Builder for [`HttpRequestSpec`].
#[derive(Debug)]
pub struct HttpRequestSpecBuilder {
    method: Method,
    url: String,
    body: Option<String>,
}

impl HttpRequestSpecBuilder {
    /// Set the JSON body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the body if one is given.
    pub fn maybe_body(mut self, body: Option<String>) -> Self {
        self.body = body;
        self
    }

    /// Validate and render the request.
    pub fn build(self, headers: &RequestHeaders, style: ConnectionStyle) -> Result<HttpRequestSpec> {
        if ![Method::GET, Method::POST, Method::PUT, Method::DELETE].contains(&self.method) {
            return Err(TransportError::InvalidRequest(format!(
                "unsupported method {}",
                self.method
            )));
        }

        let url = Url::parse(&self.url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme in {}",
                self.url
            )));
        }
        if url.host_str().is_none() {
            return Err(TransportError::InvalidUrl(format!("missing host in {}", self.url)));
        }

        let body = self.body.map(Bytes::from);
        let headers = headers.to_header_map(style, body.as_ref().map(Bytes::len))?;

        Ok(HttpRequestSpec {
            method: self.method,
            url,
            body,
            headers,
        })
    }
}
