//! Response entities produced by the transports.

use crate::error::{Result, TransportError};
use http::HeaderMap;
use serde::Deserialize;

/// An unclassified HTTP response as read off the wire.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body decoded as UTF-8, `None` when empty
    pub body: Option<String>,
}

impl RawResponse {
    /// Create a raw response; an empty body is stored as `None`.
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            status,
            headers,
            body: (!body.is_empty()).then_some(body),
        }
    }
}

/// Classifier bucket of a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// 200-299
    Success,
    /// 300-399, structurally normal but not expected from the service
    Redirection,
    /// 400, invalid request parameters
    BadRequest,
    /// 401, authentication failure
    Unauthorized,
    /// 403, forbidden
    Forbidden,
    /// 404, not found
    NotFound,
    /// 410, the resource is retired
    Gone,
    /// 429, rate limited
    TooManyRequests,
    /// 500, 502, 503 or 504
    ServerError,
    /// Anything else
    Unexpected,
}

impl StatusKind {
    /// Bucket a status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            300..=399 => Self::Redirection,
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            410 => Self::Gone,
            429 => Self::TooManyRequests,
            500 | 502 | 503 | 504 => Self::ServerError,
            _ => Self::Unexpected,
        }
    }
}

/// Rate-limit metadata reported by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimit {
    /// Requests allowed in the current window
    pub quota: Option<u64>,
    /// Requests left in the current window
    pub remaining: Option<u64>,
    /// Seconds until the window resets
    pub reset: Option<u64>,
}

impl RateLimit {
    /// True when none of the headers were present.
    pub fn is_empty(&self) -> bool {
        self.quota.is_none() && self.remaining.is_none() && self.reset.is_none()
    }
}

/// Error object returned by the service in error bodies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiError {
    /// Service-specific error code
    pub code: i64,
    /// Human-readable message
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub(crate) error: ApiError,
}

/// A classified response.
///
/// Built once per completed exchange by [`classify`](crate::classifier::classify)
/// and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ResponseWrapper {
    pub(crate) status: u16,
    pub(crate) body: Option<String>,
    pub(crate) kind: StatusKind,
    pub(crate) is_error: bool,
    pub(crate) error: Option<ApiError>,
    pub(crate) rate_limit: RateLimit,
}

impl ResponseWrapper {
    /// HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Raw response body.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Classifier bucket.
    pub fn kind(&self) -> StatusKind {
        self.kind
    }

    /// True for every status outside 200-299.
    pub fn is_error(&self) -> bool {
        self.is_error
    }

    /// True for 200-299.
    pub fn is_success(&self) -> bool {
        !self.is_error
    }

    /// True for 500, 502, 503 and 504.
    pub fn is_server_error(&self) -> bool {
        self.kind == StatusKind::ServerError
    }

    /// True for 400-499.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Service error object, when the body carried one.
    pub fn error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }

    /// Rate-limit metadata.
    pub fn rate_limit(&self) -> RateLimit {
        self.rate_limit
    }

    /// Requests allowed in the current window.
    pub fn rate_limit_quota(&self) -> Option<u64> {
        self.rate_limit.quota
    }

    /// Requests left in the current window.
    pub fn rate_limit_remaining(&self) -> Option<u64> {
        self.rate_limit.remaining
    }

    /// Seconds until the window resets.
    pub fn rate_limit_reset(&self) -> Option<u64> {
        self.rate_limit.reset
    }

    /// Turn 4xx and 5xx responses into [`TransportError::Request`].
    ///
    /// 3xx responses stay `Ok` even though they are flagged as errors.
    pub fn into_result(self) -> Result<Self> {
        if self.status >= 400 {
            Err(TransportError::Request(Box::new(self)))
        } else {
            Ok(self)
        }
    }
}
