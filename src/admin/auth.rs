use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};

use crate::error::GuardError;

/// Admin API key fixed when the admin router is built.
///
/// Reloads do not change it; the admin listener and its key need a restart.
#[derive(Clone)]
pub struct AdminKey(Arc<str>);

impl AdminKey {
    pub fn new(key: &str) -> Self {
        Self(Arc::from(key.trim()))
    }

    /// Whether `token` matches. An empty key never matches.
    pub fn matches(&self, token: &str) -> bool {
        !self.0.is_empty() && token == &*self.0
    }
}

pub async fn admin_auth_middleware(
    State(key): State<AdminKey>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, GuardError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match token {
        Some(token) if key.matches(token) => Ok(next.run(request).await),
        _ => {
            tracing::warn!(path = %request.uri().path(), "Rejected admin request");
            Err(GuardError::Unauthenticated)
        }
    }
}
