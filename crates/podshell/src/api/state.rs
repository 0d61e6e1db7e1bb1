//! Application state shared across handlers.

use std::sync::Arc;

use crate::session::SessionService;
use crate::terminal::TerminalConfig;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Session lifecycle, commands and terminals.
    pub sessions: Arc<SessionService>,
    /// Interactive terminal settings.
    pub terminal: TerminalConfig,
}

impl AppState {
    pub fn new(sessions: Arc<SessionService>, terminal: TerminalConfig) -> Self {
        Self { sessions, terminal }
    }
}
