//! Trusted-caller check for the `/v1` API.
//!
//! `/v1` can reset lockouts and record attempts for any identifier, so it is
//! meant to be called by the application backend only. When
//! `security.service_token` is set every request must carry it as a bearer
//! token; when unset the listener itself must not be reachable by end users.

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};

use crate::error::GuardError;
use crate::http::server::AppState;

pub async fn service_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, GuardError> {
    let runtime = state.runtime();
    let Some(expected) = runtime.config.security.service_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if !token.is_empty() && token == expected.trim() => Ok(next.run(request).await),
        _ => {
            tracing::warn!(path = %request.uri().path(), "Rejected /v1 request without service token");
            Err(GuardError::Unauthenticated)
        }
    }
}
