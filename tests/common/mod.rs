//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use natacare_guard::admin::setup_admin_router;
use natacare_guard::config::GuardConfig;
use natacare_guard::lifecycle::Shutdown;
use natacare_guard::{AppState, GuardServer};
use tokio::net::TcpListener;

/// Start the guard API on `addr`. Trigger the returned handle to stop it.
pub async fn start_guard(addr: SocketAddr, mut config: GuardConfig) -> (Shutdown, AppState) {
    config.listener.bind_address = addr.to_string();
    config.observability.metrics_enabled = false;

    let shutdown = Shutdown::new();
    let server = GuardServer::new(config);
    let state = server.state();
    let listener = TcpListener::bind(addr).await.unwrap();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    // Wait for server to start
    tokio::time::sleep(Duration::from_millis(100)).await;
    (shutdown, state)
}

/// Serve the admin router for `state` on `addr`.
#[allow(dead_code)]
pub async fn start_admin(addr: SocketAddr, state: AppState, shutdown: &Shutdown) {
    let listener = TcpListener::bind(addr).await.unwrap();
    let router = setup_admin_router(state);
    let stop = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = axum::serve(listener, router)
            .with_graceful_shutdown(Shutdown::notified(stop))
            .await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
}
