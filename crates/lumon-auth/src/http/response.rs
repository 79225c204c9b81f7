//! Envelope responses for axum.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::{ApiErrorBody, ApiResponse, AuthError};

/// An `AuthError` rendered as an error envelope.
#[derive(Debug)]
pub struct HttpError {
    error: AuthError,
    production: bool,
}

impl HttpError {
    pub fn new(error: AuthError, production: bool) -> Self {
        Self { error, production }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let kind = self.error.kind();
        let status =
            StatusCode::from_u16(kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if kind.is_internal() {
            tracing::error!(error = %self.error, kind = kind.as_str(), "Request failed");
        } else {
            tracing::debug!(error = %self.error, kind = kind.as_str(), "Request rejected");
        }

        let body = ApiErrorBody::from_error(&self.error, self.production);
        let retry_after = body.retry_after_secs;
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// `200` with a success envelope around `data`.
pub fn ok<T: Serialize>(data: T) -> Response {
    Json(ApiResponse::ok(data)).into_response()
}

/// `200` with a message-only success envelope.
pub fn message(text: &str) -> Response {
    Json(ApiResponse::message(text)).into_response()
}

/// `200` with an already serialized envelope, sent byte for byte.
pub fn raw_json(body: String) -> Response {
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response()
}
