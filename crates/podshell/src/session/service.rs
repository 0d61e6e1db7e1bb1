//! Session service - orchestrates sandbox pod lifecycle.
//!
//! Creates one pod per session, watches it until it is usable, primes it,
//! and tears it down on delete, replacement or idle expiry. All state lives
//! in memory; the pod's active deadline is the backstop if this process
//! goes away.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::orchestrator::{
    OrchestratorApi, OrchestratorError, PodManifest, PodPhase, ResourceSpec,
    manifest::{SESSION_LABEL, USER_LABEL, sanitize_label_value},
};
use crate::terminal::{CloseReason, ConnectionRegistry, TerminalConfig, TerminalShell};

use super::error::{SessionError, SessionResult};
use super::executor::shell_quote;
use super::models::{CreateSessionRequest, CreateSessionResponse, Session, SessionStatus};
use super::registry::SessionRegistry;

/// Prefix for generated pod names.
const POD_NAME_PREFIX: &str = "podshell-";

/// Default sandbox image.
const DEFAULT_IMAGE: &str = "python:3.12-slim";

/// Configuration for the session service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionServiceConfig {
    /// Namespace pods are created in (reported by diagnostics).
    pub namespace: String,
    /// Sandbox image.
    pub image: String,
    /// Name of the sandbox container.
    pub container_name: String,
    /// Working directory inside the sandbox; workspace paths resolve here.
    pub workdir: String,
    pub resources: ResourceSpec,
    /// Service account for sandbox pods.
    pub service_account: Option<String>,
    /// Idle time before a session is reaped. Also the pod's hard deadline.
    pub idle_timeout_seconds: u64,
    /// How often the reaper runs.
    pub reaper_interval_seconds: u64,
    /// Delay between phase polls while a pod starts.
    pub poll_interval_seconds: u64,
    /// Delay after an unexpected orchestrator error.
    pub poll_backoff_seconds: u64,
    /// Polls before a session that never becomes ready is given up.
    pub max_monitor_attempts: u32,
    /// Command run once, inside `workdir`, when the pod first reports Running.
    pub priming_command: String,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            namespace: "podshell".to_string(),
            image: DEFAULT_IMAGE.to_string(),
            container_name: "sandbox".to_string(),
            workdir: "/workspace".to_string(),
            resources: ResourceSpec::default(),
            service_account: Some("default".to_string()),
            idle_timeout_seconds: SessionService::DEFAULT_IDLE_TIMEOUT_SECONDS,
            reaper_interval_seconds: 60,
            poll_interval_seconds: 2,
            poll_backoff_seconds: 5,
            max_monitor_attempts: 300,
            priming_command: "python3 --version".to_string(),
        }
    }
}

impl SessionServiceConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Full priming script: create and enter `workdir`, then run
    /// `priming_command`. `None` when there is nothing to run.
    pub fn priming_script(&self) -> Option<String> {
        let command = self.priming_command.trim();
        if command.is_empty() {
            return None;
        }
        let workdir = shell_quote(&self.workdir);
        Some(format!("mkdir -p {workdir} && cd {workdir} && {command}"))
    }

    /// Pod manifest for a new session.
    pub fn manifest(&self, session_id: &str, user_id: Option<&str>) -> PodManifest {
        let mut manifest = PodManifest::new(&self.image)
            .name_prefix(POD_NAME_PREFIX)
            .container_name(&self.container_name)
            .workdir(&self.workdir)
            .resources(self.resources.clone())
            .active_deadline_seconds(self.idle_timeout_seconds)
            .env("PYTHONUNBUFFERED", "1")
            .label(SESSION_LABEL, sanitize_label_value(session_id));

        if let Some(user) = user_id.map(sanitize_label_value).filter(|u| !u.is_empty()) {
            manifest = manifest.label(USER_LABEL, user);
        }

        if let Some(ref account) = self.service_account {
            manifest = manifest.service_account(account);
        }

        manifest
    }
}

/// Result of one orchestrator health check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthCheck {
    fn from_result<T>(result: Result<T, OrchestratorError>, describe: impl FnOnce(T) -> String) -> Self {
        match result {
            Ok(value) => Self {
                ok: true,
                detail: Some(describe(value)),
            },
            Err(e) => Self {
                ok: false,
                detail: Some(e.to_string()),
            },
        }
    }
}

/// Orchestrator connectivity report.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorDiagnostics {
    pub healthy: bool,
    pub namespace: String,
    pub cluster: HealthCheck,
    pub namespace_check: HealthCheck,
    pub pods: HealthCheck,
    pub service_account: HealthCheck,
    /// Sessions known to this process.
    pub sessions: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub troubleshooting: Vec<String>,
}

/// Service for managing sandbox sessions.
pub struct SessionService {
    orchestrator: Arc<dyn OrchestratorApi>,
    registry: SessionRegistry,
    connections: ConnectionRegistry,
    /// Serialises evict-then-create per user.
    user_locks: DashMap<String, Arc<Mutex<()>>>,
    config: SessionServiceConfig,
}

impl SessionService {
    /// Default idle timeout in seconds.
    pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 30 * 60;

    pub fn new(orchestrator: Arc<dyn OrchestratorApi>, config: SessionServiceConfig) -> Self {
        Self {
            orchestrator,
            registry: SessionRegistry::new(),
            connections: ConnectionRegistry::new(),
            user_locks: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &SessionServiceConfig {
        &self.config
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub(crate) fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub(crate) fn orchestrator(&self) -> &Arc<dyn OrchestratorApi> {
        &self.orchestrator
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the user's lock once nobody else holds or waits on it.
    fn release_user_lock(&self, user_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.user_locks
            .remove_if(user_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Users with a create in flight.
    pub fn pending_creates(&self) -> usize {
        self.user_locks.len()
    }

    /// Create a session, replacing (or with `reconnect`, reusing) the
    /// caller's existing one.
    ///
    /// Returns as soon as the pod is submitted; readiness is tracked by a
    /// background monitor.
    pub async fn create_session(
        self: &Arc<Self>,
        request: CreateSessionRequest,
    ) -> SessionResult<CreateSessionResponse> {
        if let Err(e) = self.orchestrator.ping().await {
            warn!("Orchestrator unreachable, refusing to create session: {}", e);
            return Err(SessionError::OrchestratorUnavailable(e.to_string()));
        }

        let user_id = request
            .user_id
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        let Some(user) = user_id else {
            return self.submit_session(None).await;
        };

        let lock = self.user_lock(&user);
        let result = {
            let _guard = lock.lock().await;
            self.replace_user_session(&user, request.reconnect).await
        };
        self.release_user_lock(&user, lock);
        result
    }

    /// Reuse or evict the user's current session, then submit a new one.
    /// Runs under the user's lock.
    async fn replace_user_session(
        self: &Arc<Self>,
        user_id: &str,
        reconnect: bool,
    ) -> SessionResult<CreateSessionResponse> {
        if reconnect && let Some(existing) = self.reusable_session(user_id).await {
            return Ok(CreateSessionResponse::from_session(&existing, true));
        }

        for previous in self.registry.find_by_user(user_id) {
            info!(
                "Replacing session {} (pod {}) for user {}",
                previous.id, previous.pod_name, user_id
            );
            if let Err(e) = self.delete_session(&previous.id).await {
                debug!("Previous session {} already gone: {:?}", previous.id, e);
            }
        }

        self.submit_session(Some(user_id.to_string())).await
    }

    /// Create the pod and start watching it.
    async fn submit_session(
        self: &Arc<Self>,
        user_id: Option<String>,
    ) -> SessionResult<CreateSessionResponse> {
        let session_id = Uuid::new_v4().to_string();
        let manifest = self.config.manifest(&session_id, user_id.as_deref());
        let pod_name = self.orchestrator.create_pod(&manifest).await?;

        let session = Session::new(&session_id, user_id.clone(), pod_name);
        let monitor = self.registry.insert(session.clone());
        self.spawn_monitor(session_id.clone(), monitor);

        info!(
            "Created session {} (pod {}) for user {}",
            session.id,
            session.pod_name,
            user_id.as_deref().unwrap_or("<anonymous>")
        );

        Ok(CreateSessionResponse::from_session(&session, false))
    }

    /// The user's session if its pod is still running; otherwise the stale
    /// session is torn down and `None` returned.
    async fn reusable_session(&self, user_id: &str) -> Option<Session> {
        let existing = self.registry.find_by_user(user_id).into_iter().next()?;

        match self.orchestrator.read_pod_phase(&existing.pod_name).await {
            Ok(PodPhase::Running) => {
                self.registry.touch(&existing.id);
                info!(
                    "Reconnecting user {} to session {} (pod {})",
                    user_id, existing.id, existing.pod_name
                );
                return self.registry.get(&existing.id);
            }
            Ok(phase) => info!(
                "Session {} for user {} is {}, replacing it",
                existing.id, user_id, phase
            ),
            Err(e) => warn!(
                "Could not read pod {} for reconnect, replacing session {}: {}",
                existing.pod_name, existing.id, e
            ),
        }

        if let Err(e) = self.delete_session(&existing.id).await {
            debug!("Stale session {} already gone: {:?}", existing.id, e);
        }
        None
    }

    fn spawn_monitor(self: &Arc<Self>, session_id: String, cancel: CancellationToken) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.monitor_session(&session_id, cancel).await;
        });
    }

    /// Poll a session's pod until it is ready, gone, or the session is
    /// cancelled.
    pub async fn monitor_session(&self, session_id: &str, cancel: CancellationToken) {
        let poll = Duration::from_secs(self.config.poll_interval_seconds);
        let backoff = Duration::from_secs(self.config.poll_backoff_seconds);
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                debug!("Monitor for session {} cancelled", session_id);
                return;
            }

            let Some(session) = self.registry.get(session_id) else {
                debug!("Session {} left the registry, stopping monitor", session_id);
                return;
            };

            if attempts >= self.config.max_monitor_attempts {
                warn!(
                    "Session {} not ready after {} polls, giving up",
                    session_id, attempts
                );
                self.registry
                    .update(session_id, |s| s.status = SessionStatus::Failed);
                if let Err(e) = self.delete_session(session_id).await {
                    debug!("Failed to tear down session {}: {:?}", session_id, e);
                }
                return;
            }
            attempts += 1;

            let delay = match self.orchestrator.read_pod_phase(&session.pod_name).await {
                Ok(phase) => {
                    let status = SessionStatus::from(phase);
                    if status != session.status {
                        debug!("Session {} is now {}", session_id, status);
                        self.registry.update(session_id, |s| s.status = status);
                    }

                    match phase {
                        PodPhase::Running => {
                            if !session.ready {
                                self.prime(&session).await;
                                if cancel.is_cancelled() {
                                    return;
                                }
                                self.registry.update(session_id, |s| s.ready = true);
                                info!("Session {} (pod {}) is ready", session_id, session.pod_name);
                            }
                            return;
                        }
                        PodPhase::Succeeded | PodPhase::Failed => {
                            info!(
                                "Pod {} for session {} finished ({}), retiring session",
                                session.pod_name, session_id, phase
                            );
                            self.retire_session(session_id);
                            return;
                        }
                        PodPhase::Pending | PodPhase::Unknown => poll,
                    }
                }
                Err(e) if e.is_not_found() => poll,
                Err(e) => {
                    warn!(
                        "Failed to read pod {} for session {}: {}",
                        session.pod_name, session_id, e
                    );
                    backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run the priming command. Failure is logged; the session is usable
    /// either way.
    async fn prime(&self, session: &Session) {
        let Some(script) = self.config.priming_script() else {
            return;
        };

        match self.run_in_pod(&session.pod_name, &script, false).await {
            Ok(_) => debug!("Primed pod {}", session.pod_name),
            Err(e) => warn!(
                "Priming pod {} for session {} failed: {}",
                session.pod_name, session.id, e
            ),
        }
    }

    /// Drop a session whose pod ended on its own. The pod is left for the
    /// orchestrator to collect.
    fn retire_session(&self, session_id: &str) {
        if let Some(entry) = self.registry.remove(session_id) {
            entry.monitor.cancel();
            if let Some(shell) = entry.shell {
                shell.terminate();
            }
        }
        self.connections.close(session_id, CloseReason::Deleted);
    }

    /// Delete a session and its pod.
    ///
    /// The registry entry is removed even when the orchestrator refuses the
    /// delete.
    pub async fn delete_session(&self, session_id: &str) -> SessionResult<Session> {
        let entry = self
            .registry
            .remove(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        entry.monitor.cancel();
        if let Some(shell) = entry.shell {
            shell.terminate();
        }
        self.connections.close(session_id, CloseReason::Deleted);

        let session = entry.session;
        if !session.pod_name.is_empty() {
            match self.orchestrator.delete_pod(&session.pod_name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!("Pod {} already gone", session.pod_name);
                }
                Err(e) => warn!(
                    "Failed to delete pod {} for session {}: {}",
                    session.pod_name, session_id, e
                ),
            }
        }

        info!("Deleted session {} (pod {})", session_id, session.pod_name);

        let mut final_state = session.descriptor(false);
        final_state.status = SessionStatus::Deleted;
        final_state.ready = false;
        Ok(final_state)
    }

    /// Session descriptor by id.
    pub fn get_session(&self, session_id: &str) -> SessionResult<Session> {
        self.registry
            .get(session_id)
            .map(|s| s.descriptor(self.connections.is_attached(session_id)))
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// All sessions, oldest first.
    pub fn list_sessions(&self) -> Vec<Session> {
        self.registry
            .list()
            .into_iter()
            .map(|s| {
                let attached = self.connections.is_attached(&s.id);
                s.descriptor(attached)
            })
            .collect()
    }

    /// Record activity on a session.
    pub fn touch(&self, session_id: &str) -> SessionResult<()> {
        if self.registry.touch(session_id) {
            Ok(())
        } else {
            Err(SessionError::NotFound(session_id.to_string()))
        }
    }

    /// Session that exists and is ready for commands.
    pub(crate) fn ready_session(&self, session_id: &str) -> SessionResult<Session> {
        let session = self
            .registry
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if !session.ready {
            return Err(SessionError::NotReady(session_id.to_string()));
        }
        Ok(session)
    }

    /// Shell for an attaching client: the parked one if it is still alive,
    /// otherwise a new one.
    pub async fn open_shell(
        &self,
        session_id: &str,
        terminal: &TerminalConfig,
    ) -> SessionResult<TerminalShell> {
        let session = self.ready_session(session_id)?;

        if let Some(shell) = self.registry.take_shell(session_id) {
            if shell.is_alive() {
                debug!("Reattaching parked shell for session {}", session_id);
                return Ok(shell);
            }
            shell.terminate();
        }

        let stream = self
            .orchestrator
            .exec(&session.pod_name, terminal.shell_request())
            .await?;
        debug!("Opened shell in pod {}", session.pod_name);
        Ok(TerminalShell::new(stream))
    }

    /// Keep a detached shell for the next attach, or kill it if there is
    /// nowhere to keep it.
    pub fn park_shell(&self, session_id: &str, shell: TerminalShell) {
        match self.registry.park_shell(session_id, shell) {
            Ok(()) => debug!("Parked shell for session {}", session_id),
            Err(shell) => shell.terminate(),
        }
    }

    /// Delete every session idle for longer than the idle timeout.
    ///
    /// Returns the number of sessions deleted.
    pub async fn reap_idle_sessions(&self) -> usize {
        let timeout = self.config.idle_timeout();
        let idle = self.registry.idle_ids(Instant::now(), timeout);
        let mut reaped = 0;

        for session_id in idle {
            info!(
                "Reaping idle session {} (idle > {}s)",
                session_id, self.config.idle_timeout_seconds
            );
            match self.delete_session(&session_id).await {
                Ok(_) => reaped += 1,
                Err(e) => debug!("Idle session {} already gone: {:?}", session_id, e),
            }
        }

        if reaped > 0 {
            info!("Reaped {} idle session(s)", reaped);
        }

        reaped
    }

    /// Start a background task that periodically reaps idle sessions.
    pub fn start_reaper_task(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_secs(self.config.reaper_interval_seconds.max(1));
        info!(
            "Starting session reaper (check every {}s, timeout {}s)",
            period.as_secs(),
            self.config.idle_timeout_seconds
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                self.reap_idle_sessions().await;
            }
        })
    }

    /// Check cluster reachability, namespace, pod listing and service account.
    pub async fn diagnostics(&self) -> OrchestratorDiagnostics {
        let cluster = HealthCheck::from_result(self.orchestrator.ping().await, |_| {
            "cluster reachable".to_string()
        });
        let namespace_check = HealthCheck::from_result(self.orchestrator.read_namespace().await, |_| {
            format!("namespace {} exists", self.config.namespace)
        });
        let pods = HealthCheck::from_result(self.orchestrator.list_pods().await, |pods| {
            format!("{} sandbox pod(s)", pods.len())
        });
        let service_account = match self.config.service_account {
            Some(ref account) => {
                HealthCheck::from_result(self.orchestrator.read_service_account(account).await, |_| {
                    format!("service account {} exists", account)
                })
            }
            None => HealthCheck {
                ok: true,
                detail: Some("namespace default service account".to_string()),
            },
        };

        let mut troubleshooting = Vec::new();
        if !cluster.ok {
            troubleshooting.extend(unavailable_hints());
        }
        if !namespace_check.ok {
            troubleshooting.push(format!(
                "Create the namespace: kubectl create namespace {}",
                self.config.namespace
            ));
        }
        if !pods.ok {
            troubleshooting.push(
                "Check that the service identity may list and create pods in the namespace"
                    .to_string(),
            );
        }
        if !service_account.ok {
            troubleshooting.push(format!(
                "Create the service account in namespace {} or unset orchestrator.service_account",
                self.config.namespace
            ));
        }

        OrchestratorDiagnostics {
            healthy: cluster.ok && namespace_check.ok && pods.ok && service_account.ok,
            namespace: self.config.namespace.clone(),
            cluster,
            namespace_check,
            pods,
            service_account,
            sessions: self.registry.len(),
            troubleshooting,
        }
    }

    /// Delete every session. Used on shutdown.
    pub async fn shutdown_all(&self) -> usize {
        let ids = self.registry.ids();
        let mut deleted = 0;
        for session_id in ids {
            match self.delete_session(&session_id).await {
                Ok(_) => deleted += 1,
                Err(e) => error!("Failed to delete session {} on shutdown: {:?}", session_id, e),
            }
        }
        deleted
    }
}

/// Hints returned when the orchestrator cannot be reached.
pub fn unavailable_hints() -> Vec<String> {
    vec![
        "Check that the cluster is running and reachable from this host".to_string(),
        "Verify the kubeconfig context (kubectl config current-context)".to_string(),
        "Run `kubectl get --raw=/readyz` to test connectivity".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::manifest::APP_LABEL;

    #[test]
    fn manifest_carries_session_labels() {
        let config = SessionServiceConfig::default();
        let manifest = config.manifest("0b9c-42", Some("alice@example.com"));
        assert!(manifest.validate().is_ok());

        let doc = manifest.to_json();
        assert_eq!(doc["metadata"]["generateName"], POD_NAME_PREFIX);
        assert_eq!(doc["metadata"]["labels"][APP_LABEL], "podshell");
        assert_eq!(doc["metadata"]["labels"][SESSION_LABEL], "0b9c-42");
        assert_eq!(doc["metadata"]["labels"][USER_LABEL], "alice_example.com");
        assert_eq!(doc["spec"]["activeDeadlineSeconds"], 1800);
        assert_eq!(doc["spec"]["serviceAccountName"], "default");
    }

    #[test]
    fn priming_runs_in_configured_workdir() {
        let config = SessionServiceConfig {
            workdir: "/home/sandbox/project".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.priming_script().as_deref(),
            Some("mkdir -p '/home/sandbox/project' && cd '/home/sandbox/project' && python3 --version")
        );

        let silent = SessionServiceConfig {
            priming_command: "  ".to_string(),
            ..Default::default()
        };
        assert!(silent.priming_script().is_none());
    }

    #[test]
    fn manifest_without_user() {
        let config = SessionServiceConfig {
            service_account: None,
            ..Default::default()
        };
        let doc = config.manifest("abc", None).to_json();
        assert!(doc["metadata"]["labels"].get(USER_LABEL).is_none());
        assert!(doc["spec"].get("serviceAccountName").is_none());
    }
}
