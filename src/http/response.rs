//! Error responses.
//!
//! Every [`GuardError`] renders as `{"error": "...", "status_code": N}` with the
//! matching HTTP status; rate limit denials also carry `Retry-After`.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::GuardError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub status_code: u16,
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let retry_after = match &self {
            GuardError::RateLimited { retry_after } => Some(retry_after.as_secs().max(1)),
            _ => None,
        };

        let body = ErrorBody {
            error: self.to_string(),
            status_code: status.as_u16(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
