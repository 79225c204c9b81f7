//! Response envelopes with stable shapes.
//!
//! Success: `{"success": true, "data"?: ..., "message"?: "..."}`
//! Failure: `{"success": false, "error": "<kind>", "message": "...", "retry_after_secs"?: n}`

use serde::{Deserialize, Serialize};

use super::errors::{AuthError, ErrorKind};

/// Success envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl ApiResponse<()> {
    /// Success with only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    /// Serialize to the exact bytes sent to the client.
    pub fn to_body(&self) -> Result<String, AuthError> {
        serde_json::to_string(self)
            .map_err(|e| AuthError::ValidationFailed(format!("response is not serializable: {e}")))
    }
}

/// Error envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub success: bool,
    pub error: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ApiErrorBody {
    /// Build from an error; in production internal details are replaced.
    pub fn from_error(error: &AuthError, production: bool) -> Self {
        let retry_after_secs = match error {
            AuthError::RateExceeded {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        };
        Self {
            success: false,
            error: error.kind(),
            message: error.public_message(production),
            retry_after_secs,
        }
    }
}
