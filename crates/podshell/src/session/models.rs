//! Session data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::orchestrator::PodPhase;

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Pod submitted, phase not observed yet.
    Creating,
    /// Pod scheduled but not running.
    Pending,
    /// Pod is running.
    Running,
    /// Pod failed or the session gave up waiting for it.
    Failed,
    /// Pod ran to completion.
    Succeeded,
    /// Session was torn down.
    Deleted,
}

impl SessionStatus {
    /// Whether the session can no longer become usable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Failed | SessionStatus::Succeeded | SessionStatus::Deleted
        )
    }
}

impl From<PodPhase> for SessionStatus {
    fn from(phase: PodPhase) -> Self {
        match phase {
            PodPhase::Pending | PodPhase::Unknown => SessionStatus::Pending,
            PodPhase::Running => SessionStatus::Running,
            PodPhase::Succeeded => SessionStatus::Succeeded,
            PodPhase::Failed => SessionStatus::Failed,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Creating => write!(f, "creating"),
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Failed => write!(f, "failed"),
            SessionStatus::Succeeded => write!(f, "succeeded"),
            SessionStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// A sandbox session: one pod owned by (at most) one user.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    /// Unique session ID.
    pub id: String,
    /// Owning user, if any.
    pub user_id: Option<String>,
    /// Pod name assigned by the orchestrator.
    pub pod_name: String,
    /// Current session status.
    pub status: SessionStatus,
    /// Whether the pod is primed and accepts commands.
    pub ready: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Last workspace file saved or run.
    pub current_file: Option<String>,
    /// Whether an interactive terminal is attached.
    pub terminal_attached: bool,
    /// Seconds since creation.
    pub uptime_seconds: u64,
    #[serde(skip)]
    pub(crate) created: Instant,
    #[serde(skip)]
    pub(crate) last_activity: Instant,
}

impl Session {
    /// A freshly created session for a submitted pod.
    pub fn new(id: impl Into<String>, user_id: Option<String>, pod_name: impl Into<String>) -> Self {
        let now = Instant::now();
        let wall = Utc::now();
        Self {
            id: id.into(),
            user_id,
            pod_name: pod_name.into(),
            status: SessionStatus::Creating,
            ready: false,
            created_at: wall,
            last_activity_at: wall,
            current_file: None,
            terminal_attached: false,
            uptime_seconds: 0,
            created: now,
            last_activity: now,
        }
    }

    /// Record activity now.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_at = Utc::now();
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Whether the session is owned by `user_id` and still alive.
    pub fn is_live_for(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id) && !self.status.is_terminal()
    }

    /// Snapshot with computed fields filled in.
    pub fn descriptor(&self, terminal_attached: bool) -> Session {
        let mut snapshot = self.clone();
        snapshot.terminal_attached = terminal_attached;
        snapshot.uptime_seconds = self.created.elapsed().as_secs();
        snapshot
    }
}

/// Request to create a new session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Owning user; enforces one live session per user.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Return the user's running session instead of replacing it.
    #[serde(default)]
    pub reconnect: bool,
}

/// Response from session creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub pod_name: String,
    pub status: SessionStatus,
    pub ready: bool,
    /// True when an existing session was returned.
    pub reconnected: bool,
}

impl CreateSessionResponse {
    pub fn from_session(session: &Session, reconnected: bool) -> Self {
        Self {
            session_id: session.id.clone(),
            pod_name: session.pod_name.clone(),
            status: session.status,
            ready: session.ready,
            reconnected,
        }
    }
}
