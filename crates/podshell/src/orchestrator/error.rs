//! Orchestrator error types.

use thiserror::Error;

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors that can occur while talking to the cluster orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The orchestrator client could not run the command at all.
    #[error("orchestrator {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// The pod does not exist (or is not yet visible on the read path).
    #[error("pod not found: {0}")]
    PodNotFound(String),

    /// The orchestrator refused the request (bad manifest, quota, RBAC...).
    #[error("orchestrator rejected {command}: {message}")]
    Rejected {
        command: String,
        /// Reason code reported by the API server (e.g. "Forbidden", "Invalid").
        code: Option<String>,
        message: String,
    },

    /// The cluster could not be reached.
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Failed to parse orchestrator output.
    #[error("failed to parse orchestrator output: {0}")]
    ParseError(String),

    /// The exec stream's input side is gone.
    #[error("exec stream closed")]
    StreamClosed,

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Whether this error means the pod is not (yet) known to the orchestrator.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::PodNotFound(_))
    }
}
