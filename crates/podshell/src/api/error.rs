//! Unified API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::orchestrator::OrchestratorError;
use crate::session::{SessionError, unavailable_hints};

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable {
        message: String,
        details: Option<String>,
        troubleshooting: Vec<String>,
    },

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Gateway error: {message}")]
    BadGateway {
        message: String,
        details: Option<String>,
    },
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Cluster unreachable, with the standard troubleshooting hints.
    pub fn orchestrator_unavailable(details: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: "Kubernetes cluster is unavailable".to_string(),
            details: Some(details.into()),
            troubleshooting: unavailable_hints(),
        }
    }

    pub fn bad_gateway(msg: impl Into<String>, details: Option<String>) -> Self {
        Self::BadGateway {
            message: msg.into(),
            details,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Conflict(_) => "CONFLICT",
            Self::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::BadGateway { .. } => "BAD_GATEWAY",
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub troubleshooting: Vec<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            ApiError::BadGateway { message, details } => {
                warn!(error_code = code, message = %message, details = ?details, "Upstream error");
            }
            ApiError::ServiceUnavailable { message, details, .. } => {
                warn!(error_code = code, message = %message, details = ?details, "Service unavailable");
            }
            _ => {
                tracing::debug!(error_code = code, message = %message, "Client error");
            }
        }

        let (details, troubleshooting) = match self {
            ApiError::ServiceUnavailable {
                details,
                troubleshooting,
                ..
            } => (details, troubleshooting),
            ApiError::BadGateway { details, .. } => (details, Vec::new()),
            _ => (None, Vec::new()),
        };

        let body = ErrorResponse {
            error: message,
            code,
            details,
            troubleshooting,
        };

        (status, Json(body)).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Unavailable(msg) => ApiError::orchestrator_unavailable(msg),
            OrchestratorError::PodNotFound(name) => {
                ApiError::NotFound(format!("Pod {} not found", name))
            }
            OrchestratorError::InvalidInput(msg) => ApiError::BadRequest(msg),
            OrchestratorError::Rejected {
                command,
                code,
                message,
            } => ApiError::bad_gateway(
                format!(
                    "Orchestrator rejected {} ({})",
                    command,
                    code.as_deref().unwrap_or("unknown reason")
                ),
                Some(message),
            ),
            other => ApiError::bad_gateway("Orchestrator request failed", Some(other.to_string())),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(id) => ApiError::NotFound(format!("Session {} not found", id)),
            SessionError::NotReady(id) => ApiError::Conflict(format!("Session {} is not ready", id)),
            SessionError::OrchestratorUnavailable(msg) => ApiError::orchestrator_unavailable(msg),
            SessionError::ExecFailed(stderr) => {
                ApiError::bad_gateway("Command failed in sandbox", Some(stderr))
            }
            SessionError::NoTerminal(id) => {
                ApiError::Conflict(format!("No terminal attached to session {}", id))
            }
            SessionError::InvalidInput(msg) => ApiError::BadRequest(msg),
            SessionError::Orchestrator(e) => e.into(),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
