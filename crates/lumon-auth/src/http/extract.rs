//! Header helpers.

use axum::http::{header, HeaderMap};
use std::net::SocketAddr;

use crate::domain::{AuthError, ClientContext};

pub const IDEMPOTENCY_KEY: &str = "idempotency-key";
pub const CSRF_TOKEN: &str = "x-csrf-token";
const UNKNOWN_USER_AGENT: &str = "unknown";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Session secret from `Authorization: Bearer <secret>`.
/// Missing or non-bearer headers count as a missing session (401).
pub fn bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or(AuthError::NotFound("Session token"))
}

pub fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    header_str(headers, IDEMPOTENCY_KEY).map(str::to_string)
}

pub fn csrf_token(headers: &HeaderMap) -> Option<String> {
    header_str(headers, CSRF_TOKEN).map(str::to_string)
}

/// First hop of `X-Forwarded-For`, then `X-Real-IP`, then the socket.
pub fn client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header_str(headers, "x-real-ip"))
        .map(str::to_string)
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
}

pub fn client_context(headers: &HeaderMap, remote: Option<SocketAddr>) -> ClientContext {
    ClientContext {
        ip: client_ip(headers, remote),
        user_agent: Some(
            header_str(headers, header::USER_AGENT.as_str())
                .unwrap_or(UNKNOWN_USER_AGENT)
                .to_string(),
        ),
    }
}
