use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::GuardError;
use crate::http::server::AppState;
use crate::security::rate_limit::{ActionType, RateLimitEntry};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub rate_limit_enabled: bool,
    pub tracked_entries: usize,
    pub blocked_entries: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct EntryFilter {
    #[serde(default)]
    pub blocked: bool,
}

#[derive(Serialize)]
pub struct CleanupSummary {
    pub removed: usize,
    pub remaining: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let runtime = state.runtime();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        rate_limit_enabled: runtime.config.rate_limit.enabled,
        tracked_entries: state.limiter.len(),
        blocked_entries: state.limiter.blocked_entries().len(),
    })
}

pub async fn get_rate_limits(
    State(state): State<AppState>,
    Query(filter): Query<EntryFilter>,
) -> Json<Vec<RateLimitEntry>> {
    if filter.blocked {
        Json(state.limiter.blocked_entries())
    } else {
        Json(state.limiter.entries())
    }
}

pub async fn delete_rate_limit(
    State(state): State<AppState>,
    Path((action, identifier)): Path<(String, String)>,
) -> Result<StatusCode, GuardError> {
    let action: ActionType = action.parse()?;
    if state.limiter.reset(&identifier, action) {
        tracing::info!(identifier = %identifier, action = %action, "Rate limit cleared by admin");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(GuardError::NotFound(format!("no entry for {action}/{identifier}")))
    }
}

pub async fn cleanup_rate_limits(State(state): State<AppState>) -> Json<CleanupSummary> {
    let removed = state.limiter.cleanup_expired();
    Json(CleanupSummary {
        removed,
        remaining: state.limiter.len(),
    })
}
