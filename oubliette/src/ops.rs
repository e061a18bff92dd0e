//! Health and status endpoints — ambient observability surface, not a
//! `session` tool action — extended with a `/status`
//! endpoint summarizing active session load.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use oubliette_session::ActiveSessionManager;

#[derive(Clone)]
pub struct OpsState {
    pub active: Arc<ActiveSessionManager>,
}

pub fn router(state: OpsState) -> Router {
    Router::new().route("/health", get(health)).route("/status", get(status)).with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy", service: "oubliette", version: env!("CARGO_PKG_VERSION") })
}

#[derive(Serialize)]
struct StatusResponse {
    active_sessions: usize,
    timestamp: chrono::DateTime<chrono::Utc>,
}

async fn status(State(state): State<OpsState>) -> Json<StatusResponse> {
    let active_sessions = state.active.list().await.len();
    Json(StatusResponse { active_sessions, timestamp: chrono::Utc::now() })
}
