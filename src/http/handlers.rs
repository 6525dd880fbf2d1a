//! JSON handlers for the `/v1` policy API.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GuardError;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::password::{PasswordContext, PasswordReport};
use crate::security::rate_limit::{ActionType, RateLimitDecision};
use crate::security::rbac::{Permission, Principal, ProjectAccess, Role};
use crate::security::sanitize::{contains_suspicious_content, sanitize_json as strip_json, SanitizeKind};

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Deserialize)]
pub struct RateLimitRequest {
    pub identifier: String,
    pub action: ActionType,
}

impl RateLimitRequest {
    fn identifier(&self) -> Result<&str, GuardError> {
        let identifier = self.identifier.trim();
        if identifier.is_empty() {
            return Err(GuardError::InvalidInput("identifier must not be empty".into()));
        }
        Ok(identifier)
    }
}

#[derive(Debug, Serialize)]
pub struct RateLimitResponse {
    pub allowed: bool,
    pub remaining_attempts: u32,
    pub reset_in_secs: u64,
    pub retry_after_secs: Option<u64>,
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

impl From<RateLimitDecision> for RateLimitResponse {
    fn from(d: RateLimitDecision) -> Self {
        Self {
            allowed: d.allowed,
            remaining_attempts: d.remaining_attempts,
            reset_in_secs: ceil_secs(d.reset_in),
            retry_after_secs: d.retry_after.map(ceil_secs),
        }
    }
}

/// Record an attempt and return the decision. A denial is a normal 200 answer.
pub async fn check_rate_limit(
    State(state): State<AppState>,
    Json(req): Json<RateLimitRequest>,
) -> Result<Json<RateLimitResponse>, GuardError> {
    let decision = state.limiter.check_limit(req.identifier()?, req.action);
    Ok(Json(decision.into()))
}

pub async fn peek_rate_limit(
    State(state): State<AppState>,
    Json(req): Json<RateLimitRequest>,
) -> Result<Json<RateLimitResponse>, GuardError> {
    let decision = state.limiter.peek(req.identifier()?, req.action);
    Ok(Json(decision.into()))
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub reset: bool,
}

pub async fn reset_rate_limit(
    State(state): State<AppState>,
    Json(req): Json<RateLimitRequest>,
) -> Result<Json<ResetResponse>, GuardError> {
    let reset = state.limiter.reset(req.identifier()?, req.action);
    Ok(Json(ResetResponse { reset }))
}

#[derive(Debug, Deserialize)]
pub struct PermissionRequest {
    pub user: Option<Principal>,
    pub permission: Permission,
}

#[derive(Debug, Serialize)]
pub struct AuthzResponse {
    pub allowed: bool,
}

/// 401 without a user; otherwise whether the user holds the permission.
pub async fn check_permission(
    State(state): State<AppState>,
    Json(req): Json<PermissionRequest>,
) -> Result<Json<AuthzResponse>, GuardError> {
    let runtime = state.runtime();
    match runtime.access.require_permission(req.user.as_ref(), req.permission) {
        Ok(_) => Ok(Json(AuthzResponse { allowed: true })),
        Err(GuardError::Unauthorized(_)) => Ok(Json(AuthzResponse { allowed: false })),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ProjectAccessRequest {
    pub user: Option<Principal>,
    pub project: ProjectAccess,
}

pub async fn check_project_access(
    State(state): State<AppState>,
    Json(req): Json<ProjectAccessRequest>,
) -> Result<Json<AuthzResponse>, GuardError> {
    let runtime = state.runtime();
    let user = req.user.as_ref().ok_or(GuardError::Unauthenticated)?;
    let allowed = runtime.access.can_access_project(user, &req.project);
    metrics::record_authz_decision(allowed);
    if !allowed {
        tracing::warn!(user_id = %user.id, owner_id = %req.project.owner_id, "Project access denied");
    }
    Ok(Json(AuthzResponse { allowed }))
}

#[derive(Debug, Serialize)]
pub struct RolePermissions {
    pub role: Role,
    pub level: u8,
    pub permissions: Vec<Permission>,
}

pub async fn role_permissions(
    State(state): State<AppState>,
    Path(role): Path<String>,
) -> Result<Json<RolePermissions>, GuardError> {
    let role: Role = role
        .parse()
        .map_err(|_| GuardError::NotFound(format!("role '{role}'")))?;
    let runtime = state.runtime();
    Ok(Json(RolePermissions {
        role,
        level: role.level(),
        permissions: runtime.access.role_permissions(role),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SanitizeRequest {
    pub kind: SanitizeKind,
    pub input: String,
}

#[derive(Debug, Serialize)]
pub struct SanitizeResponse {
    pub kind: SanitizeKind,
    pub output: String,
    pub suspicious: bool,
}

pub async fn sanitize(
    State(state): State<AppState>,
    Json(req): Json<SanitizeRequest>,
) -> Result<Json<SanitizeResponse>, GuardError> {
    let runtime = state.runtime();
    let output = runtime.sanitizer.sanitize(req.kind, &req.input)?;
    Ok(Json(SanitizeResponse {
        kind: req.kind,
        output,
        suspicious: contains_suspicious_content(&req.input),
    }))
}

/// Strip markup from every string in an arbitrary JSON document.
pub async fn sanitize_json(Json(value): Json<Value>) -> Json<Value> {
    metrics::record_sanitized("json");
    Json(strip_json(value))
}

#[derive(Deserialize)]
pub struct PasswordRequest {
    pub password: String,
    #[serde(default)]
    pub context: PasswordContext,
}

#[derive(Debug, Serialize)]
pub struct PasswordResponse {
    #[serde(flatten)]
    pub report: PasswordReport,
    pub messages: Vec<String>,
}

pub async fn validate_password(
    State(state): State<AppState>,
    Json(req): Json<PasswordRequest>,
) -> Json<PasswordResponse> {
    let report = state.runtime().password.validate(&req.password, &req.context);
    let messages = report
        .issues
        .iter()
        .map(|issue| format!("Password {issue}"))
        .collect();
    Json(PasswordResponse { report, messages })
}

#[derive(Debug, Deserialize)]
pub struct GenerateQuery {
    pub length: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct GeneratedPassword {
    pub password: String,
}

pub async fn generate_password(
    State(state): State<AppState>,
    Query(query): Query<GenerateQuery>,
) -> Json<GeneratedPassword> {
    let runtime = state.runtime();
    let policy = &runtime.password;
    let password = policy.generate(query.length.unwrap_or(policy.min_length.max(16)));
    Json(GeneratedPassword { password })
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::config::GuardConfig;
    use crate::http::server::{build_router, AppState};

    fn app_with(config: GuardConfig) -> Router {
        build_router(&config, AppState::new(config.clone()))
    }

    async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_login_blocks_after_five_attempts() {
        let app = app_with(GuardConfig::default());
        let body = json!({ "identifier": "site.lead@example.com", "action": "login" });

        for remaining in (0..5).rev() {
            let (status, value) = post_json(&app, "/v1/rate-limit/check", body.clone()).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(value["allowed"], true);
            assert_eq!(value["remaining_attempts"], remaining);
        }

        let (_, value) = post_json(&app, "/v1/rate-limit/check", body.clone()).await;
        assert_eq!(value["allowed"], false);
        assert_eq!(value["retry_after_secs"], 30 * 60);

        let (_, value) = post_json(&app, "/v1/rate-limit/reset", body.clone()).await;
        assert_eq!(value["reset"], true);
        let (_, value) = post_json(&app, "/v1/rate-limit/peek", body).await;
        assert_eq!(value["remaining_attempts"], 5);
    }

    #[tokio::test]
    async fn test_empty_identifier_rejected() {
        let app = app_with(GuardConfig::default());
        let (status, value) =
            post_json(&app, "/v1/rate-limit/check", json!({ "identifier": " ", "action": "api" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["status_code"], 400);
    }

    #[tokio::test]
    async fn test_permission_check() {
        let app = app_with(GuardConfig::default());
        let viewer = json!({ "id": "v1", "role": "viewer" });

        let (status, value) = post_json(
            &app,
            "/v1/authz/permission",
            json!({ "user": viewer, "permission": "view_projects" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["allowed"], true);

        let (_, value) = post_json(
            &app,
            "/v1/authz/permission",
            json!({ "user": viewer, "permission": "manage_users" }),
        )
        .await;
        assert_eq!(value["allowed"], false);

        let (status, _) =
            post_json(&app, "/v1/authz/permission", json!({ "permission": "manage_users" })).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_project_owner_passes() {
        let app = app_with(GuardConfig::default());
        let (_, value) = post_json(
            &app,
            "/v1/authz/project",
            json!({
                "user": { "id": "owner-1", "role": "procurement" },
                "project": { "owner_id": "owner-1" }
            }),
        )
        .await;
        assert_eq!(value["allowed"], true);

        let (_, value) = post_json(
            &app,
            "/v1/authz/project",
            json!({
                "user": { "id": "other", "role": "procurement" },
                "project": { "owner_id": "owner-1", "member_ids": ["someone"] }
            }),
        )
        .await;
        assert_eq!(value["allowed"], false);
    }

    #[tokio::test]
    async fn test_role_lookup() {
        let app = app_with(GuardConfig::default());
        let response = app
            .clone()
            .oneshot(Request::get("/v1/authz/roles/finance").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/v1/authz/roles/janitor").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sanitize_endpoints() {
        let app = app_with(GuardConfig::default());
        let (status, value) = post_json(
            &app,
            "/v1/sanitize",
            json!({ "kind": "html", "input": "<p onclick=\"x()\">hi</p><script>bad()</script>" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["output"], "<p>hi</p>");
        assert_eq!(value["suspicious"], true);

        let (status, _) =
            post_json(&app, "/v1/sanitize", json!({ "kind": "url", "input": "javascript:alert(1)" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, value) =
            post_json(&app, "/v1/sanitize/json", json!({ "note": "<b>bold</b>", "n": 1 })).await;
        assert_eq!(value, json!({ "note": "bold", "n": 1 }));
    }

    #[tokio::test]
    async fn test_password_validation_messages() {
        let app = app_with(GuardConfig::default());
        let (_, value) = post_json(
            &app,
            "/v1/password/validate",
            json!({ "password": "short" }),
        )
        .await;
        assert_eq!(value["valid"], false);
        assert_eq!(value["issues"][0]["code"], "too_short");
        assert_eq!(value["messages"][0], "Password must be at least 12 characters");
    }

    #[tokio::test]
    async fn test_api_throttle_returns_429() {
        let mut config = GuardConfig::default();
        config.rate_limit.policies.insert(
            "api".into(),
            crate::config::PolicyConfig { max_attempts: 2, window_secs: 60, block_secs: 60 },
        );
        let app = app_with(config);
        let request = || {
            Request::get("/v1/authz/roles/viewer")
                .header("x-user-id", "u-1")
                .body(Body::empty())
                .unwrap()
        };

        for _ in 0..2 {
            let response = app.clone().oneshot(request()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "60");

        // Health is outside the throttle.
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_throttle_disabled() {
        let mut config = GuardConfig::default();
        config.rate_limit.enabled = false;
        config.rate_limit.policies.insert(
            "api".into(),
            crate::config::PolicyConfig { max_attempts: 1, window_secs: 60, block_secs: 60 },
        );
        let app = app_with(config);
        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(Request::get("/v1/authz/roles/viewer").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
