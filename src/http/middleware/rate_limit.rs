//! Per-client API throttling.
//!
//! Keys on the authenticated user header when present, otherwise the client IP.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::GuardError;
use crate::http::server::AppState;
use crate::security::rate_limit::ActionType;

pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Throttle key for a request.
pub fn client_key<B>(request: &Request<B>, user_id_header: &str) -> String {
    if let Some(user) = request
        .headers()
        .get(user_id_header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return format!("user:{user}");
    }

    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => format!("ip:{}", addr.ip()),
        None => "anonymous".to_string(),
    }
}

pub async fn api_rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let runtime = state.runtime();
    if !runtime.config.rate_limit.enabled {
        return next.run(request).await;
    }

    let key = client_key(&request, &runtime.config.security.user_id_header);
    let decision = state.limiter.check_limit(&key, ActionType::Api);

    if decision.allowed {
        let mut response = next.run(request).await;
        response.headers_mut().insert(
            X_RATELIMIT_REMAINING,
            HeaderValue::from(decision.remaining_attempts),
        );
        response
    } else {
        tracing::warn!(client = %key, path = %request.uri().path(), "API rate limit exceeded");
        GuardError::RateLimited {
            retry_after: decision.retry_after.unwrap_or(decision.reset_in),
        }
        .into_response()
    }
}
