//! Health check endpoint
//!
//! Reports liveness plus relay counters for monitoring probes.

use axum::{extract::State, routing::get, Json, Router};
use morphcast_sfu::RegistryStats;
use serde::Serialize;

use crate::http::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: RegistryStats,
}

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.registry.get_stats(),
    })
}
