//! Request gate: axum middleware that admits or rejects requests.
//!
//! For every request the gate derives an identity (the `API_KEY` header wins
//! over the client address), runs an admission check and then either forwards
//! the request or answers on the handler's behalf:
//!
//! - denied: `429 Too Many Requests` with `Retry-After` set to the block duration
//! - store failure: `500 Internal Server Error`
//! - allowed: the handler's response with `X-RateLimit-Limit` and
//!   `X-RateLimit-Remaining` attached

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, warn};

use super::GateState;
use crate::ratelimit::Identity;

/// Header carrying the caller's API token.
pub static API_KEY: HeaderName = HeaderName::from_static("api_key");
/// Maximum requests allowed in the window.
pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Requests remaining in the current window.
pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Rate limiting middleware.
pub async fn rate_limit_gate(
    State(state): State<GateState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let identity = extract_identity(request.headers(), connect_info.as_ref());

    let decision = match state
        .engine
        .check_within(&identity, state.request_timeout)
        .await
    {
        Ok(decision) => decision,
        Err(e) => {
            warn!(identity = %identity, error = %e, "Admission check failed");
            return server_error_response();
        }
    };

    if !decision.allowed {
        debug!(identity = %identity, retry_after = ?decision.retry_after, "Rejecting request");
        return rate_limit_response(decision.limit, decision.retry_after);
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(decision.remaining));
    response
}

/// Derive the identity for a request.
///
/// A non-empty `API_KEY` header is used as a token. Otherwise the client
/// address comes from the connection, then `X-Forwarded-For` (first hop), then
/// `X-Real-IP`.
fn extract_identity(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> Identity {
    let token = headers.get(&API_KEY).and_then(|h| h.to_str().ok());
    Identity::resolve(token, &client_address(headers, connect_info))
}

fn client_address(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    if let Some(ConnectInfo(addr)) = connect_info {
        return addr.ip().to_string();
    }

    if let Some(first) = headers
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = headers.get("X-Real-IP").and_then(|h| h.to_str().ok()) {
        return real_ip.trim().to_string();
    }

    "unknown".to_string()
}

/// Whole seconds for `Retry-After`, rounded up.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Create a 429 Too Many Requests response.
fn rate_limit_response(limit: u64, retry_after: Duration) -> Response {
    let retry_after_secs = retry_after_secs(retry_after);
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "error": "rate limit exceeded",
            "limit": limit,
            "retry_after_secs": retry_after_secs,
        })),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
    headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(0u64));
    response
}

fn server_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "internal server error" })),
    )
        .into_response()
}
