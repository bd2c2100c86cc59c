//! Admin API.
//!
//! # Routes
//! - `GET  /admin/status`
//! - `GET  /admin/contexts`
//! - `GET  /admin/pool`
//! - `GET  /admin/contexts/{name}/sessions`
//! - `POST /admin/contexts/{name}/sessions/cleanup`
//! - `POST /admin/reconcile`
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::deploy::Deployer;
use crate::net::{Connection, WorkerPool};

/// Shared state of the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub deployer: Arc<Deployer>,
    pub pool: Arc<WorkerPool<Connection>>,
    pub api_key: Arc<str>,
    pub started: Instant,
}

#[allow(deprecated)]
pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/contexts", get(get_contexts))
        .route("/admin/pool", get(get_pool))
        .route("/admin/contexts/{name}/sessions", get(get_sessions))
        .route("/admin/contexts/{name}/sessions/cleanup", post(cleanup_sessions))
        .route("/admin/reconcile", post(reconcile))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
}
