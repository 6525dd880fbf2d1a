//! End-to-end tests for the `/v1` API through the Rust SDK.

use std::net::SocketAddr;

use natacare_guard::config::{GuardConfig, PolicyConfig};
use sdk_rust::{ApiError, GuardClient, Project, User};
use serde_json::json;

mod common;

#[tokio::test]
async fn test_login_lockout_and_reset() {
    let addr: SocketAddr = "127.0.0.1:28281".parse().unwrap();
    let (shutdown, _) = common::start_guard(addr, GuardConfig::default()).await;
    let client = GuardClient::new(&format!("http://{}", addr));

    let email = "pm@natacare.example";
    for expected in (0..5).rev() {
        let status = client.check_rate_limit(email, "login").await.unwrap();
        assert!(status.allowed);
        assert_eq!(status.remaining_attempts, expected);
    }

    let denied = client.check_rate_limit(email, "login").await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after_secs, Some(30 * 60));

    // Other actions for the same identifier are unaffected.
    let other = client.peek_rate_limit(email, "password_reset").await.unwrap();
    assert!(other.allowed);
    assert_eq!(other.remaining_attempts, 3);

    assert!(client.reset_rate_limit(email, "login").await.unwrap());
    let after = client.check_rate_limit(email, "login").await.unwrap();
    assert!(after.allowed);
    assert_eq!(after.remaining_attempts, 4);

    shutdown.trigger();
}

#[tokio::test]
async fn test_authorization_questions() {
    let addr: SocketAddr = "127.0.0.1:28282".parse().unwrap();
    let (shutdown, _) = common::start_guard(addr, GuardConfig::default()).await;
    let client = GuardClient::new(&format!("http://{}", addr));

    let finance = User::new("f-1", "finance");
    assert!(client.has_permission(&finance, "view_finances").await.unwrap());
    assert!(!client.has_permission(&finance, "manage_users").await.unwrap());

    let project = Project {
        owner_id: "pm-1".into(),
        member_ids: vec!["f-1".into()],
    };
    assert!(client.can_access_project(&finance, &project).await.unwrap());
    let outsider = User::new("v-9", "viewer");
    assert!(!client.can_access_project(&outsider, &project).await.unwrap());

    let admin = client.role_permissions("admin").await.unwrap();
    assert_eq!(admin.level, 100);
    assert!(admin.permissions.iter().any(|p| p == "manage_users"));

    let err = client.role_permissions("superuser").await.unwrap_err();
    let api_error = err.downcast_ref::<ApiError>().unwrap();
    assert_eq!(api_error.status_code, 404);

    shutdown.trigger();
}

#[tokio::test]
async fn test_sanitize_and_password() {
    let addr: SocketAddr = "127.0.0.1:28283".parse().unwrap();
    let (shutdown, _) = common::start_guard(addr, GuardConfig::default()).await;
    let client = GuardClient::new(&format!("http://{}", addr));

    let out = client
        .sanitize("html", "<a href=\"javascript:alert(1)\">report</a>")
        .await
        .unwrap();
    assert!(out.suspicious);
    assert!(!out.output.contains("javascript"));
    assert!(out.output.contains("report"));

    let out = client.sanitize("csv_cell", "=HYPERLINK(\"x\")").await.unwrap();
    assert!(out.output.starts_with('\''));

    let err = client.sanitize("email", "not-an-email").await.unwrap_err();
    assert_eq!(err.downcast_ref::<ApiError>().unwrap().status_code, 400);

    let cleaned = client
        .sanitize_json(&json!({ "title": "<img src=x onerror=alert(1)>Budget", "items": [1, "<i>x</i>"] }))
        .await
        .unwrap();
    assert_eq!(cleaned["title"], "Budget");
    assert_eq!(cleaned["items"], json!([1, "x"]));

    let weak = client
        .validate_password("Budi2024!", Some("budi@natacare.example"), Some("Budi Santoso"))
        .await
        .unwrap();
    assert!(!weak.valid);
    assert!(weak.issues.iter().any(|i| i["code"] == "contains_personal_info"));

    let generated = client.generate_password(Some(20)).await.unwrap();
    assert_eq!(generated.chars().count(), 20);
    let check = client.validate_password(&generated, None, None).await.unwrap();
    assert!(check.valid, "generated password failed: {:?}", check.messages);

    shutdown.trigger();
}

#[tokio::test]
async fn test_api_throttle_per_user() {
    let addr: SocketAddr = "127.0.0.1:28284".parse().unwrap();
    let mut config = GuardConfig::default();
    config.rate_limit.policies.insert(
        "api".into(),
        PolicyConfig { max_attempts: 3, window_secs: 60, block_secs: 120 },
    );
    let (shutdown, _) = common::start_guard(addr, config).await;

    let alice = GuardClient::new(&format!("http://{}", addr)).with_user_id("alice");
    let bob = GuardClient::new(&format!("http://{}", addr)).with_user_id("bob");

    for _ in 0..3 {
        alice.role_permissions("viewer").await.unwrap();
    }
    let err = alice.role_permissions("viewer").await.unwrap_err();
    assert_eq!(err.downcast_ref::<ApiError>().unwrap().status_code, 429);

    // Throttle is per user, and health is never throttled.
    bob.role_permissions("viewer").await.unwrap();
    let health = alice.get("/health").await.unwrap();
    assert_eq!(health.status(), 200);

    shutdown.trigger();
}

#[tokio::test]
async fn test_service_token_required_for_reset() {
    let addr: SocketAddr = "127.0.0.1:28285".parse().unwrap();
    let mut config = GuardConfig::default();
    config.security.service_token = Some("backend-secret".into());
    let (shutdown, _) = common::start_guard(addr, config).await;

    let anonymous = GuardClient::new(&format!("http://{}", addr));
    let err = anonymous.reset_rate_limit("pm@natacare.example", "login").await.unwrap_err();
    assert_eq!(err.downcast_ref::<ApiError>().unwrap().status_code, 401);

    let backend = GuardClient::new(&format!("http://{}", addr)).with_service_token("backend-secret");
    backend.check_rate_limit("pm@natacare.example", "login").await.unwrap();
    assert!(backend.reset_rate_limit("pm@natacare.example", "login").await.unwrap());

    shutdown.trigger();
}
