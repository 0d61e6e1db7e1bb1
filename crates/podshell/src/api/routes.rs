//! API route definitions.

use axum::http::{Method, header};
use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;
use super::ws;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN]);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/health/orchestrator", get(handlers::orchestrator_health))
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{session_id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route(
            "/sessions/{session_id}/activity",
            post(handlers::touch_session_activity),
        )
        .route(
            "/sessions/{session_id}/workspace/sync",
            post(handlers::sync_workspace),
        )
        .route("/sessions/{session_id}/files", put(handlers::save_file))
        .route("/sessions/{session_id}/run", post(handlers::run_file))
        .route("/sessions/{session_id}/exec", post(handlers::exec_command))
        .route(
            "/sessions/{session_id}/terminal/input",
            post(handlers::terminal_input),
        )
        .route("/sessions/{session_id}/terminal", get(ws::terminal_ws))
        .route("/terminal", get(ws::terminal_ws_query))
        .with_state(state)
        .layer(cors)
        .layer(trace_layer)
}
