//! Operator API for inspecting and clearing rate limit state.
//!
//! Served on its own address and guarded by a bearer token.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use self::auth::{admin_auth_middleware, AdminKey};
use self::handlers::*;
use crate::http::server::AppState;

/// Build the admin router. The API key is read from the configuration
/// current at this call; later reloads do not change it.
pub fn setup_admin_router(state: AppState) -> Router {
    let key = AdminKey::new(&state.runtime().config.admin.api_key);
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/rate-limits", get(get_rate_limits))
        .route("/admin/rate-limits/cleanup", post(cleanup_rate_limits))
        .route(
            "/admin/rate-limits/{action}/{identifier}",
            delete(delete_rate_limit),
        )
        .layer(middleware::from_fn_with_state(key, admin_auth_middleware))
        .with_state(state)
}
