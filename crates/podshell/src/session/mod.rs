//! Session management module.
//!
//! Handles the lifecycle of sandbox sessions including creation,
//! monitoring, command execution, and cleanup.

mod error;
mod executor;
mod models;
mod registry;
mod service;

pub use error::{SessionError, SessionResult};
pub use executor::{
    ItemKind, RunFileOutcome, SyncResult, WorkspaceItem, interpreter_for, shell_quote,
    validate_workspace_path,
};
pub use models::{CreateSessionRequest, CreateSessionResponse, Session, SessionStatus};
pub use registry::{SessionEntry, SessionRegistry};
pub use service::{
    HealthCheck, OrchestratorDiagnostics, SessionService, SessionServiceConfig, unavailable_hints,
};
