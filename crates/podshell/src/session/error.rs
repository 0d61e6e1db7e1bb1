//! Session-layer error types.

use thiserror::Error;

use crate::orchestrator::OrchestratorError;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session {0} is not ready")]
    NotReady(String),

    /// The cluster could not be reached; the request was not attempted.
    #[error("orchestrator unavailable: {0}")]
    OrchestratorUnavailable(String),

    /// A command ran but failed. Carries captured stderr when available.
    #[error("command failed: {0}")]
    ExecFailed(String),

    #[error("no terminal attached to session {0}")]
    NoTerminal(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}
