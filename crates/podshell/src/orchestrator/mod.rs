//! Cluster orchestrator client.
//!
//! Provides an async interface to create, observe, delete and exec into
//! sandbox pods. The shipped implementation drives the `kubectl` CLI; tests
//! substitute their own [`OrchestratorApi`].

mod error;
pub mod exec;
pub mod manifest;

pub use error::{OrchestratorError, OrchestratorResult};
pub use exec::{ExecEvent, ExecExit, ExecInput, ExecRequest, ExecStream};
pub use manifest::{PodManifest, ResourceSpec};

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use manifest::{APP_LABEL, APP_NAME, SESSION_LABEL, validate_dns_label};

/// Lifecycle phase of a pod as reported by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parse the orchestrator's phase string. Anything unrecognised
    /// (including an empty phase on a freshly created pod) is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    /// Whether the pod will never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// A pod managed by this service, as listed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSummary {
    pub name: String,
    pub phase: PodPhase,
    /// Owning session id, from the session label.
    pub session_id: Option<String>,
    pub created_at: Option<String>,
}

/// Orchestrator abstraction for testability.
#[async_trait]
pub trait OrchestratorApi: Send + Sync {
    /// Cheap reachability probe against the cluster.
    async fn ping(&self) -> OrchestratorResult<()>;

    /// Submit a pod manifest, returning the generated pod name.
    async fn create_pod(&self, manifest: &PodManifest) -> OrchestratorResult<String>;

    /// Read the current phase of a pod.
    async fn read_pod_phase(&self, pod_name: &str) -> OrchestratorResult<PodPhase>;

    /// Delete a pod without waiting for it to go away.
    async fn delete_pod(&self, pod_name: &str) -> OrchestratorResult<()>;

    /// List pods carrying this service's labels.
    async fn list_pods(&self) -> OrchestratorResult<Vec<PodSummary>>;

    /// Check that the configured namespace exists.
    async fn read_namespace(&self) -> OrchestratorResult<()>;

    /// Check that a service account exists in the namespace.
    async fn read_service_account(&self, name: &str) -> OrchestratorResult<()>;

    /// Start a process in the pod's sandbox container.
    async fn exec(&self, pod_name: &str, request: ExecRequest) -> OrchestratorResult<ExecStream>;
}

/// Orchestrator client backed by the `kubectl` binary.
#[derive(Debug, Clone)]
pub struct KubectlOrchestrator {
    /// Path to the kubectl binary
    binary: String,
    /// kubeconfig context; the current context when unset
    context: Option<String>,
    namespace: String,
    container_name: String,
    request_timeout_seconds: u64,
}

impl KubectlOrchestrator {
    /// Create a client for the given namespace using `kubectl` from PATH.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            binary: "kubectl".to_string(),
            context: None,
            namespace: namespace.into(),
            container_name: "sandbox".to_string(),
            request_timeout_seconds: 10,
        }
    }

    /// Use a custom kubectl binary.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Use a specific kubeconfig context.
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context.filter(|c| !c.is_empty());
        self
    }

    /// Container that exec targets.
    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = name.into();
        self
    }

    /// Per-request timeout passed to kubectl.
    pub fn with_request_timeout(mut self, seconds: u64) -> Self {
        self.request_timeout_seconds = seconds;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Arguments shared by every invocation.
    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ref context) = self.context {
            args.push(format!("--context={}", context));
        }
        args.push(format!("--namespace={}", self.namespace));
        if self.request_timeout_seconds > 0 {
            args.push(format!("--request-timeout={}s", self.request_timeout_seconds));
        }
        args
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.base_args()).args(args);
        cmd
    }

    /// Run kubectl to completion and return trimmed stdout.
    async fn run(
        &self,
        name: &str,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> OrchestratorResult<String> {
        let mut cmd = self.command(args);
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = cmd.spawn().map_err(|e| OrchestratorError::CommandFailed {
            command: name.to_string(),
            message: e.to_string(),
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| OrchestratorError::CommandFailed {
                command: name.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(name, stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl OrchestratorApi for KubectlOrchestrator {
    async fn ping(&self) -> OrchestratorResult<()> {
        self.run("ping", &["get", "--raw=/readyz"], None)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                OrchestratorError::Unavailable(_) => e,
                other => OrchestratorError::Unavailable(other.to_string()),
            })
    }

    async fn create_pod(&self, manifest: &PodManifest) -> OrchestratorResult<String> {
        manifest.validate()?;

        let body = serde_json::to_vec(&manifest.to_json())
            .map_err(|e| OrchestratorError::ParseError(e.to_string()))?;

        let name = self
            .run(
                "create pod",
                &["create", "-f", "-", "-o", "jsonpath={.metadata.name}"],
                Some(&body),
            )
            .await?;

        if name.is_empty() {
            return Err(OrchestratorError::ParseError(
                "create returned no pod name".to_string(),
            ));
        }

        Ok(name)
    }

    async fn read_pod_phase(&self, pod_name: &str) -> OrchestratorResult<PodPhase> {
        validate_pod_name(pod_name)?;

        let phase = self
            .run(
                "get pod",
                &["get", "pod", pod_name, "-o", "jsonpath={.status.phase}"],
                None,
            )
            .await
            .map_err(|e| not_found_as_pod(e, pod_name))?;

        Ok(PodPhase::parse(&phase))
    }

    async fn delete_pod(&self, pod_name: &str) -> OrchestratorResult<()> {
        validate_pod_name(pod_name)?;

        self.run(
            "delete pod",
            &["delete", "pod", pod_name, "--wait=false"],
            None,
        )
        .await
        .map(|_| ())
        .map_err(|e| not_found_as_pod(e, pod_name))
    }

    async fn list_pods(&self) -> OrchestratorResult<Vec<PodSummary>> {
        let selector = format!("{}={}", APP_LABEL, APP_NAME);
        let raw = self
            .run("list pods", &["get", "pods", "-l", &selector, "-o", "json"], None)
            .await?;

        parse_pod_list(&raw)
    }

    async fn read_namespace(&self) -> OrchestratorResult<()> {
        self.run(
            "get namespace",
            &["get", "namespace", &self.namespace, "-o", "name"],
            None,
        )
        .await
        .map(|_| ())
    }

    async fn read_service_account(&self, name: &str) -> OrchestratorResult<()> {
        validate_dns_label(name, "service account")?;

        self.run(
            "get serviceaccount",
            &["get", "serviceaccount", name, "-o", "name"],
            None,
        )
        .await
        .map(|_| ())
    }

    async fn exec(&self, pod_name: &str, request: ExecRequest) -> OrchestratorResult<ExecStream> {
        validate_pod_name(pod_name)?;

        if request.command.is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "exec command cannot be empty".to_string(),
            ));
        }

        let mut args: Vec<String> = vec!["exec".to_string()];
        if request.stdin {
            args.push("-i".to_string());
        }
        if request.tty {
            args.push("-t".to_string());
        }
        args.push("-c".to_string());
        args.push(self.container_name.clone());
        args.push(pod_name.to_string());
        args.push("--".to_string());
        args.extend(request.command.iter().cloned());

        let mut cmd = Command::new(&self.binary);
        cmd.args(self.base_args()).args(&args);

        exec::spawn_exec(cmd, request.stdin)
    }
}

/// Validate a pod name before handing it to kubectl.
fn validate_pod_name(name: &str) -> OrchestratorResult<()> {
    if name.is_empty() {
        return Err(OrchestratorError::InvalidInput(
            "pod name cannot be empty".to_string(),
        ));
    }

    if name.len() > 253 {
        return Err(OrchestratorError::InvalidInput(
            "pod name exceeds maximum length of 253 characters".to_string(),
        ));
    }

    let valid_chars =
        |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.';
    if !name.chars().all(valid_chars) || name.starts_with('-') {
        return Err(OrchestratorError::InvalidInput(format!(
            "pod name '{}' contains invalid characters",
            name
        )));
    }

    Ok(())
}

fn not_found_as_pod(err: OrchestratorError, pod_name: &str) -> OrchestratorError {
    match err {
        OrchestratorError::Rejected { code: Some(ref c), .. } if c == "NotFound" => {
            OrchestratorError::PodNotFound(pod_name.to_string())
        }
        other => other,
    }
}

/// Extract the reason code from a kubectl error line such as
/// `Error from server (Forbidden): pods is forbidden: ...`.
pub fn parse_server_error(stderr: &str) -> Option<(String, String)> {
    let line = stderr
        .lines()
        .find(|l| l.starts_with("Error from server"))?;
    let rest = line.strip_prefix("Error from server")?.trim_start();
    let rest = rest.strip_prefix('(')?;
    let (code, message) = rest.split_once(')')?;
    let message = message.trim_start_matches(':').trim();
    Some((code.to_string(), message.to_string()))
}

/// Map a failed kubectl invocation to a typed error.
fn classify_failure(command: &str, stderr: &str) -> OrchestratorError {
    const UNREACHABLE: [&str; 5] = [
        "Unable to connect to the server",
        "connection refused",
        "no such host",
        "i/o timeout",
        "The connection to the server",
    ];

    if UNREACHABLE.iter().any(|needle| stderr.contains(needle)) {
        return OrchestratorError::Unavailable(stderr.to_string());
    }

    match parse_server_error(stderr) {
        Some((code, message)) => OrchestratorError::Rejected {
            command: command.to_string(),
            code: Some(code),
            message,
        },
        None => OrchestratorError::CommandFailed {
            command: command.to_string(),
            message: stderr.to_string(),
        },
    }
}

fn parse_pod_list(raw: &str) -> OrchestratorResult<Vec<PodSummary>> {
    #[derive(Deserialize)]
    struct PodList {
        #[serde(default)]
        items: Vec<PodItem>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct PodItem {
        metadata: PodMetadata,
        #[serde(default)]
        status: PodStatus,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct PodMetadata {
        name: String,
        #[serde(default)]
        labels: BTreeMap<String, String>,
        creation_timestamp: Option<String>,
    }

    #[derive(Deserialize, Default)]
    struct PodStatus {
        phase: Option<String>,
    }

    let list: PodList =
        serde_json::from_str(raw).map_err(|e| OrchestratorError::ParseError(e.to_string()))?;

    Ok(list
        .items
        .into_iter()
        .map(|item| PodSummary {
            phase: PodPhase::parse(item.status.phase.as_deref().unwrap_or_default()),
            session_id: item.metadata.labels.get(SESSION_LABEL).cloned(),
            created_at: item.metadata.creation_timestamp,
            name: item.metadata.name,
        })
        .collect())
}
