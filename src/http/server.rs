//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, timeout, body and concurrency limits)
//! - Guard `/v1` with the optional service token, then the per-client throttle
//! - Hold the hot-swappable policy runtime and the shared rate limiter
//! - Serve over plain TCP or TLS until shutdown is broadcast

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::ConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GuardConfig;
use crate::http::handlers;
use crate::http::middleware::{api_rate_limit_middleware, service_auth_middleware};
use crate::http::request::{request_id, MakeGuardRequestId};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::security::password::PasswordPolicy;
use crate::security::rate_limit::{policies_from_config, RateLimiter};
use crate::security::rbac::AccessPolicy;
use crate::security::sanitize::Sanitizer;

/// Policies compiled from one configuration snapshot.
pub struct Runtime {
    pub config: GuardConfig,
    pub access: AccessPolicy,
    pub password: PasswordPolicy,
    pub sanitizer: Sanitizer,
}

impl Runtime {
    pub fn from_config(config: GuardConfig) -> Self {
        Self {
            access: AccessPolicy::from_config(&config.rbac),
            password: config.password.clone(),
            sanitizer: Sanitizer::new(config.sanitizer.clone()),
            config,
        }
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<ArcSwap<Runtime>>,
    pub limiter: Arc<RateLimiter>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: GuardConfig) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        Self {
            runtime: Arc::new(ArcSwap::from_pointee(Runtime::from_config(config))),
            limiter,
            started_at: Instant::now(),
        }
    }

    /// Current policy snapshot.
    pub fn runtime(&self) -> Arc<Runtime> {
        self.runtime.load_full()
    }

    /// Swap in policies from a new configuration. Rate limit counters survive.
    ///
    /// Listener, TLS and admin settings only take effect on restart.
    pub fn apply_config(&self, config: GuardConfig) {
        self.limiter
            .update_policies(policies_from_config(&config.rate_limit));
        self.runtime.store(Arc::new(Runtime::from_config(config)));
        tracing::info!("Configuration applied");
    }
}

/// HTTP server for the guard API.
pub struct GuardServer {
    router: Router,
    config: GuardConfig,
    state: AppState,
}

impl GuardServer {
    /// Create a new server with fresh state.
    pub fn new(config: GuardConfig) -> Self {
        let state = AppState::new(config.clone());
        Self::with_state(config, state)
    }

    /// Create a server around existing state.
    pub fn with_state(config: GuardConfig, state: AppState) -> Self {
        let router = build_router(&config, state.clone());
        Self { router, config, state }
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Run on a bound TCP listener until shutdown is broadcast.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(Shutdown::notified(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run with TLS until shutdown is broadcast.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            Shutdown::notified(shutdown).await;
            drain.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service_with_connect_info::<SocketAddr>())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
///
/// The body limit sits outside the timeout so the timeout wraps plain axum
/// bodies.
pub fn build_router(config: &GuardConfig, state: AppState) -> Router {
    let api = Router::new()
        .route("/v1/rate-limit/check", post(handlers::check_rate_limit))
        .route("/v1/rate-limit/peek", post(handlers::peek_rate_limit))
        .route("/v1/rate-limit/reset", post(handlers::reset_rate_limit))
        .route("/v1/authz/permission", post(handlers::check_permission))
        .route("/v1/authz/project", post(handlers::check_project_access))
        .route("/v1/authz/roles/{role}", get(handlers::role_permissions))
        .route("/v1/sanitize", post(handlers::sanitize))
        .route("/v1/sanitize/json", post(handlers::sanitize_json))
        .route("/v1/password/validate", post(handlers::validate_password))
        .route("/v1/password/generate", get(handlers::generate_password))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api_rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            service_auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(api)
        .with_state(state)
        .layer(middleware::from_fn(record_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeGuardRequestId))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    tracing::info_span!(
                        "request",
                        request_id = %request_id(request),
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    Duration::from_secs(config.timeouts.request_secs),
                ))
                .layer(ConcurrencyLimitLayer::new(config.listener.max_connections)),
        )
}

async fn record_metrics(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    metrics::record_request(&method, &path, response.status().as_u16(), start);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::rate_limit::ActionType;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_has_request_id() {
        let app = build_router(&GuardConfig::default(), AppState::new(GuardConfig::default()));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let mut config = GuardConfig::default();
        config.security.max_body_size = 64;
        let app = build_router(&config, AppState::new(config.clone()));
        let body = serde_json::json!({ "kind": "plain_text", "input": "x".repeat(256) }).to_string();
        let response = app
            .oneshot(
                Request::post("/v1/sanitize")
                    .header("content-type", "application/json")
                    .header("content-length", body.len())
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_service_token_guards_v1() {
        let mut config = GuardConfig::default();
        config.security.service_token = Some("backend-token".into());
        let app = build_router(&config, AppState::new(config.clone()));
        let reset = |auth: Option<&str>| {
            let mut builder = Request::post("/v1/rate-limit/reset").header("content-type", "application/json");
            if let Some(auth) = auth {
                builder = builder.header("authorization", auth);
            }
            builder
                .body(Body::from(r#"{"identifier":"victim@example.com","action":"login"}"#))
                .unwrap()
        };

        let response = app.clone().oneshot(reset(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app.clone().oneshot(reset(Some("Bearer wrong"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app.clone().oneshot(reset(Some("Bearer "))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app.clone().oneshot(reset(Some("Bearer backend-token"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Health stays open for liveness checks.
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_apply_config_keeps_counters() {
        let state = AppState::new(GuardConfig::default());
        state.limiter.check_limit("pm@example.com", ActionType::Login);
        state.limiter.check_limit("pm@example.com", ActionType::Login);

        let mut config = GuardConfig::default();
        config.rate_limit.policies.insert(
            "login".into(),
            crate::config::PolicyConfig { max_attempts: 3, window_secs: 900, block_secs: 60 },
        );
        state.apply_config(config);

        let next = state.limiter.check_limit("pm@example.com", ActionType::Login);
        assert!(next.allowed);
        assert_eq!(next.remaining_attempts, 0);
        assert!(!state.limiter.check_limit("pm@example.com", ActionType::Login).allowed);
    }

    #[tokio::test]
    async fn test_apply_config_swaps_policies() {
        let state = AppState::new(GuardConfig::default());
        assert!(state.runtime().config.rate_limit.enabled);

        let mut config = GuardConfig::default();
        config.rate_limit.enabled = false;
        config.password.min_length = 20;
        state.apply_config(config);

        let runtime = state.runtime();
        assert!(!runtime.config.rate_limit.enabled);
        assert_eq!(runtime.password.min_length, 20);
    }
}
