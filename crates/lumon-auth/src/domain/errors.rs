//! # Domain Errors
//!
//! Error taxonomy for the auth gate and its mapping onto stable,
//! client-visible error kinds.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Generic message returned for server-side failures in production.
pub const GENERIC_INTERNAL_MESSAGE: &str = "Internal server error";

/// Auth gate error types.
///
/// Every variant is terminal for the current request; nothing here is
/// retried internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Identity assertion or request field could not be parsed.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Recomputed assertion signature does not match the supplied one.
    #[error("Invalid signature: assertion data may be tampered")]
    SignatureMismatch,

    /// Assertion signature is valid but it was issued too long ago.
    #[error("Assertion is stale: issued {age_secs}s ago (max {max_age_secs}s)")]
    StaleAssertion {
        /// Seconds since issuance
        age_secs: i64,
        /// Configured staleness window
        max_age_secs: i64,
    },

    /// No active record matches (session, user profile).
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Session exists but its expiry has passed.
    #[error("Session expired")]
    Expired,

    /// Role or tenant binding does not permit the operation.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Fixed-window ceiling reached for (subject, endpoint).
    #[error("Rate limit exceeded for {endpoint}")]
    RateExceeded {
        /// Endpoint whose ceiling was hit
        endpoint: String,
        /// Seconds until the current window elapses
        retry_after_secs: u64,
    },

    /// Input shape violates a bound (key length, metadata depth, ...).
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Policy refusal unrelated to role (legal docs, origin, CSRF).
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Server misconfiguration (e.g. insecure identity mode in production).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A store call did not finish before its deadline.
    #[error("Store deadline elapsed: {0}")]
    Timeout(String),

    /// Persistence layer failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Stable, client-visible error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedInput,
    SignatureMismatch,
    StaleAssertion,
    NotFound,
    Expired,
    Unauthorized,
    RateExceeded,
    ValidationFailed,
    Forbidden,
    Configuration,
    Timeout,
    Storage,
}

impl ErrorKind {
    /// Wire name used in envelopes and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedInput => "malformed_input",
            ErrorKind::SignatureMismatch => "signature_mismatch",
            ErrorKind::StaleAssertion => "stale_assertion",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Expired => "expired",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::RateExceeded => "rate_exceeded",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Storage => "storage",
        }
    }

    /// HTTP status family for this kind.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::MalformedInput | ErrorKind::ValidationFailed => 400,
            ErrorKind::SignatureMismatch
            | ErrorKind::StaleAssertion
            | ErrorKind::NotFound
            | ErrorKind::Expired => 401,
            ErrorKind::Unauthorized | ErrorKind::Forbidden => 403,
            ErrorKind::RateExceeded => 429,
            ErrorKind::Timeout => 503,
            ErrorKind::Configuration | ErrorKind::Storage => 500,
        }
    }

    /// Whether details of this kind are internal and must be hidden in production.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ErrorKind::Configuration | ErrorKind::Storage | ErrorKind::Timeout
        )
    }
}

impl AuthError {
    /// Classify into a stable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::MalformedInput(_) => ErrorKind::MalformedInput,
            AuthError::SignatureMismatch => ErrorKind::SignatureMismatch,
            AuthError::StaleAssertion { .. } => ErrorKind::StaleAssertion,
            AuthError::NotFound(_) => ErrorKind::NotFound,
            AuthError::Expired => ErrorKind::Expired,
            AuthError::Unauthorized(_) => ErrorKind::Unauthorized,
            AuthError::RateExceeded { .. } => ErrorKind::RateExceeded,
            AuthError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            AuthError::Forbidden(_) => ErrorKind::Forbidden,
            AuthError::Configuration(_) => ErrorKind::Configuration,
            AuthError::Timeout(_) => ErrorKind::Timeout,
            AuthError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Message safe to show to the caller.
    ///
    /// In production, internal kinds collapse to a generic message.
    pub fn public_message(&self, production: bool) -> String {
        if production && self.kind().is_internal() {
            GENERIC_INTERNAL_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }

    /// Shorthand for the session lookup miss.
    pub fn session_not_found() -> Self {
        AuthError::NotFound("Session")
    }
}

/// Outbound port failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Backend unreachable or returned an error.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Unique constraint rejected an insert.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// Backend reported its own deadline as exceeded.
    #[error("store operation timed out")]
    Timeout,
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Timeout => AuthError::Timeout(e.to_string()),
            other => AuthError::Storage(other.to_string()),
        }
    }
}

/// Result alias for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;
