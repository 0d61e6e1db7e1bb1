//! Test utilities and common setup.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use podshell::api::{AppState, create_router};
use podshell::orchestrator::{
    ExecEvent, ExecExit, ExecInput, ExecRequest, ExecStream, OrchestratorApi, OrchestratorError,
    OrchestratorResult, PodManifest, PodPhase, PodSummary,
};
use podshell::session::{SessionService, SessionServiceConfig};
use podshell::terminal::TerminalConfig;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Canned result for a one-shot command.
#[derive(Debug, Clone, Default)]
pub struct Scripted {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl Scripted {
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    pub fn fail(stderr: &str, code: i32) -> Self {
        Self {
            stderr: stderr.to_string(),
            code,
            ..Default::default()
        }
    }
}

/// Failure returned by the next pod phase read.
#[derive(Debug, Clone, Copy)]
pub enum ReadFault {
    /// The pod is not visible yet.
    NotFound,
    /// The client command itself failed.
    CommandFailed,
}

impl ReadFault {
    fn into_error(self, pod_name: &str) -> OrchestratorError {
        match self {
            ReadFault::NotFound => OrchestratorError::PodNotFound(pod_name.to_string()),
            ReadFault::CommandFailed => OrchestratorError::CommandFailed {
                command: "get".to_string(),
                message: "i/o timeout".to_string(),
            },
        }
    }
}

#[derive(Default)]
struct FakeState {
    ping_fails: bool,
    delete_fails: bool,
    namespace_missing: bool,
    /// Phases handed to every new pod; the last one sticks.
    phase_script: Vec<PodPhase>,
    phases: HashMap<String, VecDeque<PodPhase>>,
    read_faults: VecDeque<ReadFault>,
    phase_reads: Vec<tokio::time::Instant>,
    pods: Vec<String>,
    next_pod: u32,
    created: Vec<Value>,
    deleted: Vec<String>,
    commands: Vec<String>,
    stdin_payloads: Vec<String>,
    shells_opened: usize,
    responses: Vec<(String, Scripted)>,
}

/// In-memory orchestrator with scriptable pod phases and command results.
///
/// Interactive shells echo their stdin back as stdout and exit on `exit\n`.
#[derive(Clone, Default)]
pub struct FakeOrchestrator {
    state: Arc<Mutex<FakeState>>,
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.set_phases(&[PodPhase::Running]);
        fake
    }

    pub fn set_phases(&self, phases: &[PodPhase]) {
        self.state.lock().unwrap().phase_script = phases.to_vec();
    }

    /// Override the remaining phases of one pod.
    pub fn set_pod_phase(&self, pod: &str, phase: PodPhase) {
        self.state
            .lock()
            .unwrap()
            .phases
            .insert(pod.to_string(), VecDeque::from([phase]));
    }

    pub fn set_ping_fails(&self, fails: bool) {
        self.state.lock().unwrap().ping_fails = fails;
    }

    pub fn set_delete_fails(&self, fails: bool) {
        self.state.lock().unwrap().delete_fails = fails;
    }

    pub fn set_namespace_missing(&self, missing: bool) {
        self.state.lock().unwrap().namespace_missing = missing;
    }

    /// Reply to any command containing `pattern`.
    pub fn respond(&self, pattern: &str, reply: Scripted) {
        self.state
            .lock()
            .unwrap()
            .responses
            .push((pattern.to_string(), reply));
    }

    pub fn created(&self) -> Vec<Value> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn stdin_payloads(&self) -> Vec<String> {
        self.state.lock().unwrap().stdin_payloads.clone()
    }

    /// Fail the next phase reads, in order, before the phase script resumes.
    pub fn fail_phase_reads(&self, faults: &[ReadFault]) {
        self.state.lock().unwrap().read_faults.extend(faults.iter().copied());
    }

    /// When each phase read happened.
    pub fn phase_reads(&self) -> Vec<tokio::time::Instant> {
        self.state.lock().unwrap().phase_reads.clone()
    }

    pub fn shells_opened(&self) -> usize {
        self.state.lock().unwrap().shells_opened
    }

    fn scripted_for(&self, command: &str) -> Scripted {
        let state = self.state.lock().unwrap();
        state
            .responses
            .iter()
            .rev()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_default()
    }

    fn run_command(&self, command: String, with_stdin: bool) -> ExecStream {
        self.state.lock().unwrap().commands.push(command.clone());
        let reply = self.scripted_for(&command);
        let (events_tx, events_rx) = mpsc::channel(16);
        let terminate = CancellationToken::new();

        let (stdin, mut input_rx) = if with_stdin {
            let (tx, rx) = mpsc::channel::<Bytes>(16);
            (Some(ExecInput::new(tx)), Some(rx))
        } else {
            (None, None)
        };

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            if let Some(ref mut rx) = input_rx {
                let mut payload = Vec::new();
                while let Some(chunk) = rx.recv().await {
                    payload.extend_from_slice(&chunk);
                }
                state
                    .lock()
                    .unwrap()
                    .stdin_payloads
                    .push(String::from_utf8_lossy(&payload).into_owned());
            }
            if !reply.stdout.is_empty() {
                let _ = events_tx.send(ExecEvent::Stdout(Bytes::from(reply.stdout))).await;
            }
            if !reply.stderr.is_empty() {
                let _ = events_tx.send(ExecEvent::Stderr(Bytes::from(reply.stderr))).await;
            }
            let _ = events_tx
                .send(ExecEvent::Exited(ExecExit {
                    code: Some(reply.code),
                    message: None,
                }))
                .await;
        });

        ExecStream::new(stdin, events_rx, terminate)
    }

    fn open_shell(&self) -> ExecStream {
        self.state.lock().unwrap().shells_opened += 1;
        let (events_tx, events_rx) = mpsc::channel(64);
        let (input_tx, mut input_rx) = mpsc::channel::<Bytes>(64);
        let terminate = CancellationToken::new();
        let cancelled = terminate.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => {
                        let _ = events_tx
                            .send(ExecEvent::Exited(ExecExit {
                                code: None,
                                message: Some("terminated".to_string()),
                            }))
                            .await;
                        return;
                    }
                    _ = events_tx.closed() => return,
                    chunk = input_rx.recv() => match chunk {
                        Some(data) if data.as_ref() == b"exit\n" => {
                            let _ = events_tx
                                .send(ExecEvent::Exited(ExecExit { code: Some(0), message: None }))
                                .await;
                            return;
                        }
                        Some(data) => {
                            if events_tx.send(ExecEvent::Stdout(data)).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            let _ = events_tx
                                .send(ExecEvent::Exited(ExecExit { code: Some(0), message: None }))
                                .await;
                            return;
                        }
                    },
                }
            }
        });

        ExecStream::new(Some(ExecInput::new(input_tx)), events_rx, terminate)
    }
}

#[async_trait]
impl OrchestratorApi for FakeOrchestrator {
    async fn ping(&self) -> OrchestratorResult<()> {
        if self.state.lock().unwrap().ping_fails {
            return Err(OrchestratorError::Unavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }

    async fn create_pod(&self, manifest: &PodManifest) -> OrchestratorResult<String> {
        manifest.validate()?;
        let mut state = self.state.lock().unwrap();
        state.next_pod += 1;
        let name = format!("podshell-{:05}", state.next_pod);
        let script = state.phase_script.iter().copied().collect();
        state.phases.insert(name.clone(), script);
        state.pods.push(name.clone());
        state.created.push(manifest.to_json());
        Ok(name)
    }

    async fn read_pod_phase(&self, pod_name: &str) -> OrchestratorResult<PodPhase> {
        let mut state = self.state.lock().unwrap();
        state.phase_reads.push(tokio::time::Instant::now());
        if let Some(fault) = state.read_faults.pop_front() {
            return Err(fault.into_error(pod_name));
        }
        let Some(queue) = state.phases.get_mut(pod_name) else {
            return Err(OrchestratorError::PodNotFound(pod_name.to_string()));
        };
        let phase = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().copied()
        };
        Ok(phase.unwrap_or(PodPhase::Unknown))
    }

    async fn delete_pod(&self, pod_name: &str) -> OrchestratorResult<()> {
        let mut state = self.state.lock().unwrap();
        state.deleted.push(pod_name.to_string());
        if state.delete_fails {
            return Err(OrchestratorError::Rejected {
                command: "delete".to_string(),
                code: Some("Forbidden".to_string()),
                message: "pods is forbidden".to_string(),
            });
        }
        state.phases.remove(pod_name);
        state.pods.retain(|p| p != pod_name);
        Ok(())
    }

    async fn list_pods(&self) -> OrchestratorResult<Vec<PodSummary>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .iter()
            .map(|name| PodSummary {
                name: name.clone(),
                phase: state
                    .phases
                    .get(name)
                    .and_then(|q| q.front().copied())
                    .unwrap_or(PodPhase::Unknown),
                session_id: None,
                created_at: None,
            })
            .collect())
    }

    async fn read_namespace(&self) -> OrchestratorResult<()> {
        if self.state.lock().unwrap().namespace_missing {
            return Err(OrchestratorError::Rejected {
                command: "get".to_string(),
                code: Some("NotFound".to_string()),
                message: "namespaces \"podshell\" not found".to_string(),
            });
        }
        Ok(())
    }

    async fn read_service_account(&self, _name: &str) -> OrchestratorResult<()> {
        Ok(())
    }

    async fn exec(&self, pod_name: &str, request: ExecRequest) -> OrchestratorResult<ExecStream> {
        if !self.state.lock().unwrap().phases.contains_key(pod_name) {
            return Err(OrchestratorError::PodNotFound(pod_name.to_string()));
        }
        match request.command.as_slice() {
            [sh, flag, command] if sh == "/bin/sh" && flag == "-c" => {
                Ok(self.run_command(command.clone(), request.stdin))
            }
            _ => Ok(self.open_shell()),
        }
    }
}

/// Session settings tuned for fast tests.
pub fn test_config() -> SessionServiceConfig {
    SessionServiceConfig {
        idle_timeout_seconds: 60,
        reaper_interval_seconds: 5,
        poll_interval_seconds: 1,
        poll_backoff_seconds: 2,
        max_monitor_attempts: 10,
        priming_command: "echo primed".to_string(),
        ..Default::default()
    }
}

pub fn test_terminal_config() -> TerminalConfig {
    TerminalConfig {
        flush_delay_ms: 20,
        ..Default::default()
    }
}

pub fn test_service(fake: &FakeOrchestrator) -> Arc<SessionService> {
    Arc::new(SessionService::new(Arc::new(fake.clone()), test_config()))
}

/// Router over a fresh fake orchestrator.
pub fn test_app() -> (Router, Arc<SessionService>, FakeOrchestrator) {
    let fake = FakeOrchestrator::new();
    let sessions = test_service(&fake);
    let app = create_router(AppState::new(Arc::clone(&sessions), test_terminal_config()));
    (app, sessions, fake)
}

/// Wait until the session reports ready, panicking after `limit`.
pub async fn wait_ready(sessions: &SessionService, session_id: &str, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if let Ok(session) = sessions.get_session(session_id)
            && session.ready
        {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "session {} not ready within {:?}",
            session_id,
            limit
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the session is gone from the registry.
pub async fn wait_gone(sessions: &SessionService, session_id: &str, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    while sessions.get_session(session_id).is_ok() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "session {} still present after {:?}",
            session_id,
            limit
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
