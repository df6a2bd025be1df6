//! Configuration for the transports

use crate::error::{Result, TransportError};
use crate::tls::SslVersion;
use std::time::Duration;

const DEFAULT_SSL_VERSION: &str = "TLS";
const DEFAULT_MAX_RETRY_TIMES: u32 = 3;
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CONNECTION_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_QUEUE_CAPACITY: usize = 1000;
/// Largest queue whose stream ids (3, 5, 7, ...) stay within the 31-bit
/// HTTP/2 stream id space.
pub const MAX_QUEUE_CAPACITY: usize = (1 << 30) - 1;
const DEFAULT_SETTINGS_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration shared by both transports.
///
/// Credentials, proxy and trust policy are passed to the transport builders
/// separately; this struct only holds tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// SSL protocol selector: `"TLS"`, `"TLSv1.2"` or `"TLSv1.3"`
    pub ssl_version: String,

    /// Retries after a connect-phase timeout (sequential transport)
    pub max_retry_times: u32,

    /// Time allowed to read a response once connected (sequential transport)
    pub read_timeout: Duration,

    /// Time allowed to establish a TCP connection
    pub connection_timeout: Duration,

    /// Time allowed to establish the shared multiplexed connection,
    /// including proxy tunnel, TLS and HTTP/2 handshakes
    pub connection_request_timeout: Duration,

    /// Time allowed for the proxy to answer a CONNECT request
    pub socket_timeout: Duration,

    /// Value of the `X-Encrypt-Type` header, empty to omit it
    pub encrypt_type: String,

    /// Maximum number of queued multiplexed requests
    pub queue_capacity: usize,

    /// Time allowed for the HTTP/2 settings handshake
    pub settings_timeout: Duration,

    /// Time allowed per stream when draining multiplexed responses
    pub stream_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ssl_version: DEFAULT_SSL_VERSION.to_string(),
            max_retry_times: DEFAULT_MAX_RETRY_TIMES,
            read_timeout: DEFAULT_READ_TIMEOUT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            connection_request_timeout: DEFAULT_CONNECTION_REQUEST_TIMEOUT,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            encrypt_type: String::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            settings_timeout: DEFAULT_SETTINGS_TIMEOUT,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Load configuration from environment variables, reading a `.env` file
    /// first if one exists.
    ///
    /// This will look for:
    /// - `PUSHLINK_SSL_VERSION`
    /// - `PUSHLINK_MAX_RETRY_TIMES`
    /// - `PUSHLINK_READ_TIMEOUT_MS`
    /// - `PUSHLINK_CONNECTION_TIMEOUT_MS`
    /// - `PUSHLINK_CONNECTION_REQUEST_TIMEOUT_MS`
    /// - `PUSHLINK_SOCKET_TIMEOUT_MS`
    /// - `PUSHLINK_ENCRYPT_TYPE`
    ///
    /// Unparsable numbers are ignored and the default is kept.
    #[cfg(feature = "env")]
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Ok(ssl_version) = dotenvy::var("PUSHLINK_SSL_VERSION") {
            config.ssl_version = ssl_version;
        }

        if let Ok(retries) = dotenvy::var("PUSHLINK_MAX_RETRY_TIMES")
            && let Ok(retries) = retries.parse::<u32>()
        {
            config.max_retry_times = retries;
        }

        if let Some(timeout) = env_millis("PUSHLINK_READ_TIMEOUT_MS") {
            config.read_timeout = timeout;
        }
        if let Some(timeout) = env_millis("PUSHLINK_CONNECTION_TIMEOUT_MS") {
            config.connection_timeout = timeout;
        }
        if let Some(timeout) = env_millis("PUSHLINK_CONNECTION_REQUEST_TIMEOUT_MS") {
            config.connection_request_timeout = timeout;
        }
        if let Some(timeout) = env_millis("PUSHLINK_SOCKET_TIMEOUT_MS") {
            config.socket_timeout = timeout;
        }

        if let Ok(encrypt_type) = dotenvy::var("PUSHLINK_ENCRYPT_TYPE") {
            config.encrypt_type = encrypt_type;
        }

        config
    }

    /// Merge this configuration with another, with the other's non-default
    /// values taking precedence.
    pub fn merge(mut self, other: TransportConfig) -> Self {
        if other.ssl_version != DEFAULT_SSL_VERSION {
            self.ssl_version = other.ssl_version;
        }
        if other.max_retry_times != DEFAULT_MAX_RETRY_TIMES {
            self.max_retry_times = other.max_retry_times;
        }
        if other.read_timeout != DEFAULT_READ_TIMEOUT {
            self.read_timeout = other.read_timeout;
        }
        if other.connection_timeout != DEFAULT_CONNECTION_TIMEOUT {
            self.connection_timeout = other.connection_timeout;
        }
        if other.connection_request_timeout != DEFAULT_CONNECTION_REQUEST_TIMEOUT {
            self.connection_request_timeout = other.connection_request_timeout;
        }
        if other.socket_timeout != DEFAULT_SOCKET_TIMEOUT {
            self.socket_timeout = other.socket_timeout;
        }
        if !other.encrypt_type.is_empty() {
            self.encrypt_type = other.encrypt_type;
        }
        if other.queue_capacity != DEFAULT_QUEUE_CAPACITY {
            self.queue_capacity = other.queue_capacity;
        }
        if other.settings_timeout != DEFAULT_SETTINGS_TIMEOUT {
            self.settings_timeout = other.settings_timeout;
        }
        if other.stream_timeout != DEFAULT_STREAM_TIMEOUT {
            self.stream_timeout = other.stream_timeout;
        }

        self
    }

    /// Reject zero timeouts, a queue capacity outside
    /// `1..=MAX_QUEUE_CAPACITY` and unknown SSL versions.
    pub fn validate(&self) -> Result<()> {
        SslVersion::parse(&self.ssl_version)?;

        let timeouts = [
            ("read_timeout", self.read_timeout),
            ("connection_timeout", self.connection_timeout),
            ("connection_request_timeout", self.connection_request_timeout),
            ("socket_timeout", self.socket_timeout),
            ("settings_timeout", self.settings_timeout),
            ("stream_timeout", self.stream_timeout),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| value.is_zero()) {
            return Err(TransportError::InvalidConfig(format!(
                "{name} must be greater than zero"
            )));
        }

        if self.queue_capacity == 0 {
            return Err(TransportError::InvalidConfig(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(TransportError::InvalidConfig(format!(
                "queue_capacity must not exceed {MAX_QUEUE_CAPACITY}"
            )));
        }

        Ok(())
    }
}

#[cfg(feature = "env")]
fn env_millis(name: &str) -> Option<Duration> {
    dotenvy::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}
