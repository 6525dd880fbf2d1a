//! NataCare Guard
//!
//! Security policy service built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────┐
//!                     │                  NATACARE GUARD                  │
//!                     │                                                  │
//!     Client Request  │  ┌─────────┐   ┌──────────────┐   ┌───────────┐  │
//!     ────────────────┼─▶│  http   │──▶│ api throttle │──▶│ handlers  │  │
//!                     │  │ server  │   │ (rate_limit) │   │   /v1     │  │
//!                     │  └─────────┘   └──────────────┘   └─────┬─────┘  │
//!                     │                                         │        │
//!                     │                                         ▼        │
//!                     │        ┌────────────┬──────────┬──────────────┐  │
//!                     │        │ rate_limit │   rbac   │  sanitize    │  │
//!                     │        │            │          │  password    │  │
//!                     │        └────────────┴──────────┴──────────────┘  │
//!                     │                                                  │
//!                     │  ┌────────────────────────────────────────────┐  │
//!                     │  │           Cross-Cutting Concerns           │  │
//!                     │  │  config + hot reload │ observability       │  │
//!                     │  │  admin API           │ lifecycle/shutdown  │  │
//!                     │  └────────────────────────────────────────────┘  │
//!                     └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use natacare_guard::admin::setup_admin_router;
use natacare_guard::config::{load_config, watcher::ConfigWatcher, GuardConfig};
use natacare_guard::lifecycle::{wait_for_signal, Shutdown};
use natacare_guard::net::load_tls_config;
use natacare_guard::observability::{logging, metrics};
use natacare_guard::GuardServer;

#[derive(Parser)]
#[command(name = "natacare-guard")]
#[command(about = "Rate limiting, access control and input sanitization service", long_about = None)]
struct Args {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!("natacare-guard v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        rate_limit_enabled = config.rate_limit.enabled,
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    if config.security.service_token.is_none() {
        tracing::warn!("No security.service_token set; /v1 must only be reachable by trusted callers");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let server = GuardServer::new(config.clone());
    let state = server.state();
    let mut tasks = Vec::new();

    tasks.push(state.limiter.clone().spawn_cleanup(
        Duration::from_secs(config.rate_limit.cleanup_interval_secs),
        shutdown.subscribe(),
    ));

    // The notify handle must outlive the reload task.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            let reload_state = state.clone();
            let mut stop = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(new_config) = updates.recv() => reload_state.apply_config(new_config),
                        _ = stop.recv() => break,
                    }
                }
            }));
            Some(handle)
        }
        None => None,
    };

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
        let admin = setup_admin_router(state.clone());
        let stop = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(admin_listener, admin)
                .with_graceful_shutdown(Shutdown::notified(stop))
                .await
            {
                tracing::error!(error = %e, "Admin server failed");
            }
        }));
    }

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_shutdown.trigger();
    });

    match &config.listener.tls {
        Some(tls) => {
            let tls_config = load_tls_config(tls).await?;
            let addr = config.listener.bind_address.parse()?;
            server.run_tls(addr, tls_config, shutdown.subscribe()).await?;
        }
        None => {
            let listener = TcpListener::bind(&config.listener.bind_address).await?;
            server.run(listener, shutdown.subscribe()).await?;
        }
    }

    // Stop background tasks too if the server exited on its own.
    shutdown.trigger();
    for task in tasks {
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
