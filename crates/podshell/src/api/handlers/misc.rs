//! Health endpoints.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use tracing::instrument;

use crate::api::state::AppState;
use crate::session::OrchestratorDiagnostics;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Liveness of this process.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Orchestrator connectivity checks. 503 when any check fails.
#[instrument(skip(state))]
pub async fn orchestrator_health(
    State(state): State<AppState>,
) -> (StatusCode, Json<OrchestratorDiagnostics>) {
    let diagnostics = state.sessions.diagnostics().await;
    let status = if diagnostics.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(diagnostics))
}
