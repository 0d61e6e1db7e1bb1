//! Session lifecycle handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::{info, instrument};

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::session::{CreateSessionRequest, CreateSessionResponse, Session};

/// Create a session (or reconnect to the caller's running one).
#[instrument(skip(state, request), fields(user_id = ?request.user_id, reconnect = request.reconnect))]
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<CreateSessionResponse>)> {
    let response = state.sessions.create_session(request).await?;
    info!(session_id = %response.session_id, pod = %response.pod_name, "Session created");

    let status = if response.reconnected {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(response)))
}

/// List all sessions.
#[instrument(skip(state))]
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<Session>> {
    let sessions = state.sessions.list_sessions();
    info!(count = sessions.len(), "Listed sessions");
    Json(sessions)
}

/// Session status, readiness and uptime.
#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    state.sessions.touch(&session_id)?;
    Ok(Json(state.sessions.get_session(&session_id)?))
}

/// Delete a session and its pod.
#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    let session = state.sessions.delete_session(&session_id).await?;
    info!(session_id = %session_id, "Session deleted");
    Ok(Json(session))
}

/// Record client activity to keep the session from being reaped.
#[instrument(skip(state))]
pub async fn touch_session_activity(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.sessions.touch(&session_id)?;
    Ok(StatusCode::NO_CONTENT)
}
