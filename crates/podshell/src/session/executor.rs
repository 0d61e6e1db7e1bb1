//! One-shot commands and workspace file operations inside a session's pod.

use std::path::{Component, Path};

use bytes::Bytes;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::orchestrator::{ExecEvent, ExecExit, ExecRequest, ExecStream};

use super::error::{SessionError, SessionResult};
use super::service::SessionService;

/// Kind of a workspace item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

/// One file or folder to mirror into the pod's workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceItem {
    /// Path relative to the workspace root.
    pub path: String,
    #[serde(rename = "type", alias = "kind")]
    pub kind: ItemKind,
    #[serde(default)]
    pub content: String,
}

/// Outcome for one synced item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResult {
    pub path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of running a workspace file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunFileOutcome {
    /// Sent to the attached terminal; output streams there.
    Routed,
    /// Ran detached; combined stdout and stderr.
    Captured {
        output: String,
        exit_code: Option<i32>,
        success: bool,
    },
}

/// Collected output of a finished exec.
#[derive(Debug, Default)]
pub(crate) struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit: Option<ExecExit>,
}

impl CommandOutput {
    /// Stdout on success, otherwise the most useful failure description.
    fn into_result(self) -> SessionResult<String> {
        match self.exit {
            Some(ref exit) if exit.success() => Ok(self.stdout),
            Some(exit) => {
                let stderr = self.stderr.trim();
                let message = if !stderr.is_empty() {
                    stderr.to_string()
                } else if let Some(code) = exit.code {
                    format!("command exited with status {}", code)
                } else {
                    format!(
                        "command terminated: {}",
                        exit.message.as_deref().unwrap_or("no exit status")
                    )
                };
                Err(SessionError::ExecFailed(message))
            }
            None => Err(SessionError::ExecFailed(
                "command stream ended without an exit status".to_string(),
            )),
        }
    }
}

/// Drain an exec stream. Stderr is always kept; stdout only when asked.
pub(crate) async fn collect_output(mut stream: ExecStream, capture_stdout: bool) -> CommandOutput {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit = None;

    while let Some(event) = stream.events.recv().await {
        match event {
            ExecEvent::Stdout(chunk) if capture_stdout => stdout.extend_from_slice(&chunk),
            ExecEvent::Stdout(_) => {}
            ExecEvent::Stderr(chunk) => stderr.extend_from_slice(&chunk),
            ExecEvent::Exited(status) => {
                exit = Some(status);
                break;
            }
        }
    }

    CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit,
    }
}

/// Quote a string for POSIX `sh`.
pub fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Normalise a workspace-relative path. Absolute paths and `..` are rejected.
pub fn validate_workspace_path(raw: &str) -> SessionResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SessionError::InvalidInput("path cannot be empty".to_string()));
    }
    if trimmed.contains('\0') {
        return Err(SessionError::InvalidInput(
            "path cannot contain null bytes".to_string(),
        ));
    }

    let mut parts = Vec::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(SessionError::InvalidInput(format!(
                    "path '{}' escapes the workspace",
                    raw
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(SessionError::InvalidInput(format!(
                    "path '{}' must be relative to the workspace",
                    raw
                )));
            }
        }
    }

    if parts.is_empty() {
        return Err(SessionError::InvalidInput(format!(
            "path '{}' names the workspace root",
            raw
        )));
    }

    Ok(parts.join("/"))
}

/// Interpreter for a runnable file, by extension.
pub fn interpreter_for(path: &str) -> SessionResult<&'static str> {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("py") => Ok("python3 -u"),
        Some("sh") => Ok("bash"),
        Some("js") => Ok("node"),
        _ => Err(SessionError::InvalidInput(format!(
            "don't know how to run '{}'",
            path
        ))),
    }
}

impl SessionService {
    /// Run a shell command in a ready session.
    ///
    /// Resolves to stdout (empty unless `capture_output`). A non-zero exit
    /// fails with the captured stderr.
    pub async fn execute_command(
        &self,
        session_id: &str,
        command: &str,
        capture_output: bool,
    ) -> SessionResult<String> {
        let session = self.ready_session(session_id)?;
        self.registry().touch(session_id);

        let result = self.run_in_pod(&session.pod_name, command, capture_output).await;
        self.registry().touch(session_id);
        result
    }

    /// Run a shell command without the readiness check.
    pub(crate) async fn run_in_pod(
        &self,
        pod_name: &str,
        command: &str,
        capture_output: bool,
    ) -> SessionResult<String> {
        self.exec_shell(pod_name, command, capture_output, None)
            .await?
            .into_result()
    }

    async fn exec_shell(
        &self,
        pod_name: &str,
        command: &str,
        capture_output: bool,
        stdin: Option<Bytes>,
    ) -> SessionResult<CommandOutput> {
        let mut request = ExecRequest::command(["/bin/sh", "-c", command]);
        request.stdin = stdin.is_some();

        let mut stream = self.orchestrator().exec(pod_name, request).await?;

        if let Some(data) = stdin {
            // Dropping the only input handle closes stdin.
            if let Some(input) = stream.stdin.take() {
                input.write(data).await?;
            }
        }

        Ok(collect_output(stream, capture_output).await)
    }

    fn workspace_path(&self, relative: &str) -> String {
        format!("{}/{}", self.config().workdir.trim_end_matches('/'), relative)
    }

    /// Write a file into the workspace, creating parent directories.
    ///
    /// Content travels over stdin so it is written byte for byte.
    pub async fn save_file(&self, session_id: &str, path: &str, content: &str) -> SessionResult<()> {
        let session = self.ready_session(session_id)?;
        let relative = validate_workspace_path(path)?;
        let target = self.workspace_path(&relative);
        let parent = Path::new(&target)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.config().workdir.clone());

        let command = format!(
            "mkdir -p {} && cat > {}",
            shell_quote(&parent),
            shell_quote(&target)
        );
        self.exec_shell(
            &session.pod_name,
            &command,
            false,
            Some(Bytes::copy_from_slice(content.as_bytes())),
        )
        .await?
        .into_result()?;

        self.registry().update(session_id, |s| {
            s.current_file = Some(relative.clone());
            s.touch();
        });
        debug!("Saved {} ({} bytes) in session {}", relative, content.len(), session_id);
        Ok(())
    }

    /// Create a directory (and parents) in the workspace.
    pub async fn create_directory(&self, session_id: &str, path: &str) -> SessionResult<()> {
        let session = self.ready_session(session_id)?;
        let relative = validate_workspace_path(path)?;
        let command = format!("mkdir -p {}", shell_quote(&self.workspace_path(&relative)));

        self.run_in_pod(&session.pod_name, &command, false).await?;
        self.registry().touch(session_id);
        Ok(())
    }

    /// Mirror a batch of files and folders into the workspace.
    ///
    /// Folders are created before files. Individual failures are reported
    /// per item rather than failing the batch.
    pub async fn sync_workspace(
        &self,
        session_id: &str,
        mut items: Vec<WorkspaceItem>,
    ) -> SessionResult<Vec<SyncResult>> {
        self.ready_session(session_id)?;
        items.sort_by_key(|item| item.kind != ItemKind::Folder);

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let outcome = match item.kind {
                ItemKind::Folder => self.create_directory(session_id, &item.path).await,
                ItemKind::File => self.save_file(session_id, &item.path, &item.content).await,
            };
            results.push(SyncResult {
                path: item.path,
                success: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
            });
        }

        let failed = results.iter().filter(|r| !r.success).count();
        info!(
            "Synced {} workspace item(s) into session {} ({} failed)",
            results.len(),
            session_id,
            failed
        );
        Ok(results)
    }

    /// Run a workspace file.
    ///
    /// With a terminal attached the command is typed into the live shell;
    /// otherwise it runs detached and its combined output is returned.
    pub async fn run_file(&self, session_id: &str, path: &str) -> SessionResult<RunFileOutcome> {
        let session = self.ready_session(session_id)?;
        let relative = validate_workspace_path(path)?;
        let interpreter = interpreter_for(&relative)?;

        self.registry().update(session_id, |s| {
            s.current_file = Some(relative.clone());
            s.touch();
        });

        let command = format!(
            "cd {} && {} {}",
            shell_quote(&self.config().workdir),
            interpreter,
            shell_quote(&self.workspace_path(&relative))
        );

        if let Some(input) = self.connections().input(session_id) {
            match input.write(format!("{}\n", command)).await {
                Ok(()) => return Ok(RunFileOutcome::Routed),
                Err(e) => debug!(
                    "Terminal for session {} is gone ({}), running detached",
                    session_id, e
                ),
            }
        }

        let output = self
            .exec_shell(&session.pod_name, &format!("{} 2>&1", command), true, None)
            .await?;
        let exit_code = output.exit.as_ref().and_then(|e| e.code);
        let success = output.exit.as_ref().is_some_and(ExecExit::success);

        Ok(RunFileOutcome::Captured {
            output: output.stdout,
            exit_code,
            success,
        })
    }

    /// Type a command into the attached terminal.
    pub async fn send_terminal_command(&self, session_id: &str, command: &str) -> SessionResult<()> {
        self.touch(session_id)?;
        let input = self
            .connections()
            .input(session_id)
            .ok_or_else(|| SessionError::NoTerminal(session_id.to_string()))?;

        let mut line = command.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        input
            .write(line)
            .await
            .map_err(|_| SessionError::NoTerminal(session_id.to_string()))
    }
}
