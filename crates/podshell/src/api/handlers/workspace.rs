//! Workspace, command and terminal-input handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::session::{RunFileOutcome, SyncResult, WorkspaceItem};

#[derive(Debug, Deserialize)]
pub struct SyncWorkspaceRequest {
    #[serde(default)]
    pub items: Vec<WorkspaceItem>,
}

#[derive(Debug, Serialize)]
pub struct SyncWorkspaceResponse {
    pub results: Vec<SyncResult>,
    pub synced: usize,
    pub failed: usize,
}

#[derive(Debug, Deserialize)]
pub struct SaveFileRequest {
    pub path: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct SaveFileResponse {
    pub path: String,
    pub bytes: usize,
}

#[derive(Debug, Deserialize)]
pub struct RunFileRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecCommandRequest {
    pub command: String,
    #[serde(default = "default_true")]
    pub capture_output: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct ExecCommandResponse {
    pub output: String,
}

#[derive(Debug, Deserialize)]
pub struct TerminalInputRequest {
    pub command: String,
}

/// Mirror files and folders into the pod's workspace.
#[instrument(skip(state, request), fields(items = request.items.len()))]
pub async fn sync_workspace(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<SyncWorkspaceRequest>,
) -> ApiResult<Json<SyncWorkspaceResponse>> {
    let results = state
        .sessions
        .sync_workspace(&session_id, request.items)
        .await?;
    let failed = results.iter().filter(|r| !r.success).count();
    info!(synced = results.len() - failed, failed, "Workspace synced");

    Ok(Json(SyncWorkspaceResponse {
        synced: results.len() - failed,
        failed,
        results,
    }))
}

/// Save a single workspace file.
#[instrument(skip(state, request), fields(path = %request.path))]
pub async fn save_file(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<SaveFileRequest>,
) -> ApiResult<Json<SaveFileResponse>> {
    state
        .sessions
        .save_file(&session_id, &request.path, &request.content)
        .await?;

    Ok(Json(SaveFileResponse {
        bytes: request.content.len(),
        path: request.path,
    }))
}

/// Run a workspace file, in the attached terminal if there is one.
#[instrument(skip(state, request), fields(path = %request.path))]
pub async fn run_file(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<RunFileRequest>,
) -> ApiResult<Json<RunFileOutcome>> {
    let outcome = state.sessions.run_file(&session_id, &request.path).await?;
    Ok(Json(outcome))
}

/// Run a shell command and return its stdout.
#[instrument(skip(state, request))]
pub async fn exec_command(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ExecCommandRequest>,
) -> ApiResult<Json<ExecCommandResponse>> {
    if request.command.trim().is_empty() {
        return Err(ApiError::bad_request("command cannot be empty"));
    }

    let output = state
        .sessions
        .execute_command(&session_id, &request.command, request.capture_output)
        .await?;
    Ok(Json(ExecCommandResponse { output }))
}

/// Type a command into the attached terminal.
#[instrument(skip(state, request))]
pub async fn terminal_input(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<TerminalInputRequest>,
) -> ApiResult<StatusCode> {
    state
        .sessions
        .send_terminal_command(&session_id, &request.command)
        .await?;
    Ok(StatusCode::ACCEPTED)
}
