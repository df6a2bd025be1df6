//! Response status classification and rate-limit extraction.

use crate::response::{ApiErrorResponse, RateLimit, ResponseWrapper, StatusKind};
use http::HeaderMap;
use tracing::{debug, error, warn};

/// Header names carrying the request quota, first present wins.
pub const RATE_LIMIT_QUOTA_HEADERS: &[&str] =
    &["x-rate-limit-limit", "x-ratelimit-quota", "x-ratelimit-limit"];

/// Header names carrying the remaining requests, first present wins.
pub const RATE_LIMIT_REMAINING_HEADERS: &[&str] =
    &["x-rate-limit-remaining", "x-ratelimit-remaining"];

/// Header names carrying the reset interval, first present wins.
pub const RATE_LIMIT_RESET_HEADERS: &[&str] = &["x-rate-limit-reset", "x-ratelimit-reset"];

/// Classify a completed exchange.
///
/// Every status outside 200-299 is marked as error. Rate-limit headers are
/// read regardless of status. Diagnostics are logged per status the same
/// way for both transports.
pub fn classify(status: u16, body: Option<String>, headers: &HeaderMap) -> ResponseWrapper {
    let kind = StatusKind::from_status(status);
    let is_error = kind != StatusKind::Success;
    let content = body.as_deref().unwrap_or("");

    match kind {
        StatusKind::Success => {
            debug!(status, "Succeed to get response OK");
            debug!(content, "Response content");
        }
        StatusKind::Redirection => {
            warn!(status, content, "Normal response but unexpected");
        }
        _ => {
            warn!(status, content, "Got error response");
            log_error_diagnostic(kind);
        }
    }

    let error = if is_error {
        body.as_deref()
            .and_then(|text| serde_json::from_str::<ApiErrorResponse>(text).ok())
            .map(|parsed| parsed.error)
    } else {
        None
    };

    ResponseWrapper {
        status,
        body,
        kind,
        is_error,
        error,
        rate_limit: parse_rate_limit(headers),
    }
}

/// Read the rate-limit headers. Unparsable values count as absent.
pub fn parse_rate_limit(headers: &HeaderMap) -> RateLimit {
    RateLimit {
        quota: first_header_u64(headers, RATE_LIMIT_QUOTA_HEADERS),
        remaining: first_header_u64(headers, RATE_LIMIT_REMAINING_HEADERS),
        reset: first_header_u64(headers, RATE_LIMIT_RESET_HEADERS),
    }
}

fn first_header_u64(headers: &HeaderMap, names: &[&str]) -> Option<u64> {
    names
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

fn log_error_diagnostic(kind: StatusKind) {
    match kind {
        StatusKind::BadRequest => {
            error!("Your request params is invalid. Please check them according to error message.")
        }
        StatusKind::Unauthorized => {
            error!("Authentication failed! Please check authentication params according to docs.")
        }
        StatusKind::Forbidden => error!(
            "Request is forbidden! Maybe your appkey is listed in blacklist or your params is invalid."
        ),
        StatusKind::NotFound => error!("Request page is not found! Maybe your params is invalid."),
        StatusKind::Gone => {
            // 410 shares the 429 handling.
            error!("Request resource is no longer in service. Please according to notice on official website.");
            error!("Too many requests! Please review your appkey's request quota.");
        }
        StatusKind::TooManyRequests => {
            error!("Too many requests! Please review your appkey's request quota.")
        }
        StatusKind::ServerError => error!(
            "Seems encountered server error. Maybe the service is in maintenance? Please retry later."
        ),
        StatusKind::Unexpected => error!("Unexpected response."),
        StatusKind::Success | StatusKind::Redirection => {}
    }
}
