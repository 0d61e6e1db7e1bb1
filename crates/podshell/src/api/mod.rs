//! HTTP API module.
//!
//! REST endpoints for session management plus the terminal WebSocket.

mod error;
mod handlers;
mod routes;
mod state;
mod ws;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
