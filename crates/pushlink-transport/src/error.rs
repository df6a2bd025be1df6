//! Transport error types

use crate::response::ResponseWrapper;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Why a connection-level failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    /// The connection could not be established in time.
    ConnectTimeout,
    /// The connection was established but the response did not arrive in time.
    ReadTimeout,
    /// Any other I/O failure.
    Io,
}

impl ConnectionFailure {
    /// Only connect-phase timeouts are retried: the request never reached
    /// the server, so sending it again cannot duplicate a push.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ConnectTimeout)
    }
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectTimeout => f.write_str("connect timed out"),
            Self::ReadTimeout => f.write_str("read timed out"),
            Self::Io => f.write_str("I/O error"),
        }
    }
}

/// Errors that can occur in transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// The exchange failed before a response could be read.
    #[error("Connection error ({reason}) after {attempts} attempt(s): {message}")]
    Connection {
        /// Failure category
        reason: ConnectionFailure,
        /// Attempts made for this logical call
        attempts: u32,
        /// Underlying error description
        message: String,
    },

    /// The server answered with a 4xx or 5xx status.
    #[error("Request failed with status {}", .0.status())]
    Request(Box<ResponseWrapper>),

    /// The HTTP/2 connection settings were not acknowledged in time.
    #[error("Timed out after {0:?} waiting for the connection settings handshake")]
    HandshakeTimeout(Duration),

    /// No response arrived for a stream within the per-stream timeout.
    #[error("Timed out waiting for a response on stream {stream_id}")]
    ResponseTimeout {
        /// Logical stream id
        stream_id: u32,
    },

    /// The multiplexed request queue is full.
    #[error("Request queue is full (capacity {capacity})")]
    QueueOverflow {
        /// Configured queue capacity
        capacity: usize,
    },

    /// The request cannot be sent as built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The URL could not be parsed or is not usable.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required configuration input was not provided.
    #[error("Missing required configuration: {0}")]
    MissingConfig(&'static str),

    /// TLS setup or negotiation failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTP/2 protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A stream id was registered twice.
    #[error("Stream {0} is already registered")]
    DuplicateStream(u32),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub(crate) fn connection(
        reason: ConnectionFailure,
        attempts: u32,
        message: impl Into<String>,
    ) -> Self {
        Self::Connection {
            reason,
            attempts,
            message: message.into(),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { reason, .. } => reason.is_retryable(),
            _ => false,
        }
    }

    /// HTTP status of a [`Request`](Self::Request) error.
    pub fn status(&self) -> Option<u16> {
        self.response().map(ResponseWrapper::status)
    }

    /// The classified response behind a [`Request`](Self::Request) error.
    pub fn response(&self) -> Option<&ResponseWrapper> {
        match self {
            Self::Request(response) => Some(response),
            _ => None,
        }
    }

    /// Stream id of a [`ResponseTimeout`](Self::ResponseTimeout) error.
    pub fn stream_id(&self) -> Option<u32> {
        match self {
            Self::ResponseTimeout { stream_id } => Some(*stream_id),
            _ => None,
        }
    }
}

impl From<h2::Error> for TransportError {
    fn from(err: h2::Error) -> Self {
        if let Some(io) = err.get_io() {
            return Self::connection(ConnectionFailure::Io, 1, io.to_string());
        }
        Self::Protocol(err.to_string())
    }
}

impl From<url::ParseError> for TransportError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<rustls::Error> for TransportError {
    fn from(err: rustls::Error) -> Self {
        Self::Tls(err.to_string())
    }
}
