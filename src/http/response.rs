//! Rate limit headers and the 429 response.

use axum::http::header::{HeaderName, RETRY_AFTER};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::ratelimit::RateLimitResult;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Error code in the body of a 429.
pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
/// Message in the body of a 429.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests. Please try again later.";

/// Set the limit and remaining headers.
pub fn apply_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
}

/// Set the reset header, in Unix seconds.
pub fn apply_reset_header(headers: &mut HeaderMap, reset_at: u64) {
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_at));
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    code: &'static str,
    message: &'static str,
    retry_after: u64,
}

/// A denied check, rendered as HTTP 429.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitExceeded(pub RateLimitResult);

impl IntoResponse for RateLimitExceeded {
    fn into_response(self) -> Response {
        let result = self.0;
        let retry_after = result.retry_after.unwrap_or(0);

        let mut headers = HeaderMap::new();
        apply_limit_headers(&mut headers, result.limit, 0);
        apply_reset_header(&mut headers, result.reset_at);
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));

        let body = ErrorBody {
            error: ErrorDetail {
                code: RATE_LIMIT_EXCEEDED,
                message: RATE_LIMIT_MESSAGE,
                retry_after,
            },
        };

        (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
    }
}
