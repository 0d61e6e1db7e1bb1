//! WebSocket upgrade for interactive terminals.

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    response::Response,
};
use serde::Deserialize;
use tracing::info;

use crate::terminal;

use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TerminalQuery {
    pub session_id: Option<String>,
}

/// GET /sessions/{session_id}/terminal
pub async fn terminal_ws(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(state, Some(session_id), ws)
}

/// GET /terminal?session_id=...
pub async fn terminal_ws_query(
    State(state): State<AppState>,
    Query(query): Query<TerminalQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(state, query.session_id, ws)
}

fn upgrade(state: AppState, session_id: Option<String>, ws: WebSocketUpgrade) -> Response {
    info!(session_id = ?session_id, "Terminal upgrade request");
    ws.on_upgrade(move |socket| {
        terminal::attach(state.sessions, state.terminal, session_id, socket)
    })
}
