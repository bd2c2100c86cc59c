use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::context::ContextSummary;
use crate::deploy::{DeploymentStats, ReconcileReport};
use crate::net::PoolStats;
use crate::session::SessionSummary;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub deployment: DeploymentStats,
}

#[derive(Serialize)]
pub struct CleanupResult {
    pub context: String,
    pub removed: usize,
}

type ApiError = (StatusCode, String);

fn unknown_context(name: &str) -> ApiError {
    (StatusCode::NOT_FOUND, format!("No deployed application named '{}'", name))
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started.elapsed().as_secs(),
        deployment: state.deployer.stats(),
    })
}

pub async fn get_contexts(State(state): State<AdminState>) -> Json<Vec<ContextSummary>> {
    Json(state.deployer.contexts())
}

pub async fn get_pool(State(state): State<AdminState>) -> Json<PoolStats> {
    Json(state.pool.stats())
}

pub async fn get_sessions(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    let context = state
        .deployer
        .context_by_name(&name)
        .ok_or_else(|| unknown_context(&name))?;
    Ok(Json(context.sessions().summaries()))
}

pub async fn cleanup_sessions(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<CleanupResult>, ApiError> {
    let context = state
        .deployer
        .context_by_name(&name)
        .ok_or_else(|| unknown_context(&name))?;
    let removed = context.sessions().cleanup_expired();
    tracing::info!(context_path = %context.context_path(), removed, "Admin session sweep");
    Ok(Json(CleanupResult {
        context: context.context_path().to_string(),
        removed,
    }))
}

pub async fn reconcile(State(state): State<AdminState>) -> Json<ReconcileReport> {
    Json(state.deployer.reconcile_now().await)
}
