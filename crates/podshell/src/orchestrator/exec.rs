//! Exec streaming: run a process inside a pod and pipe its standard streams.
//!
//! An [`ExecStream`] is the narrow capability both the command executor and
//! the interactive bridge consume. Output arrives on an event channel; the
//! final event is always [`ExecEvent::Exited`].

use std::process::Stdio;

use bytes::Bytes;
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::{OrchestratorError, OrchestratorResult};

/// Capacity of the output event channel.
const EVENT_BUFFER: usize = 256;

/// Capacity of the stdin channel.
const INPUT_BUFFER: usize = 64;

/// Read chunk size for stdout/stderr pipes.
const READ_CHUNK: usize = 8192;

/// What to run inside the pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Argument vector, executed without a shell unless it names one.
    pub command: Vec<String>,
    /// Keep stdin open for writing.
    pub stdin: bool,
    /// Allocate a pseudo terminal.
    pub tty: bool,
}

impl ExecRequest {
    /// A non-interactive command: no stdin, no tty.
    pub fn command<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: argv.into_iter().map(Into::into).collect(),
            stdin: false,
            tty: false,
        }
    }

    /// An interactive process with stdin attached.
    pub fn interactive<I, S>(argv: I, tty: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: argv.into_iter().map(Into::into).collect(),
            stdin: true,
            tty,
        }
    }
}

/// Final status of an exec'd process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Orchestrator-side failure description, if any.
    pub message: Option<String>,
}

impl ExecExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// One event from a running exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Stdout(Bytes),
    Stderr(Bytes),
    Exited(ExecExit),
}

/// Write side of an exec'd process's stdin. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ExecInput {
    tx: mpsc::Sender<Bytes>,
}

impl ExecInput {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Write raw bytes into the process's stdin.
    pub async fn write(&self, data: impl Into<Bytes>) -> OrchestratorResult<()> {
        self.tx
            .send(data.into())
            .await
            .map_err(|_| OrchestratorError::StreamClosed)
    }

    /// Whether the process side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A running exec.
///
/// Dropping the stream (and with it the event receiver) stops the process.
#[derive(Debug)]
pub struct ExecStream {
    /// Present when the request asked for stdin.
    pub stdin: Option<ExecInput>,
    /// Output events, `Exited` last.
    pub events: mpsc::Receiver<ExecEvent>,
    /// Cancel to kill the process.
    pub terminate: CancellationToken,
}

impl ExecStream {
    pub fn new(
        stdin: Option<ExecInput>,
        events: mpsc::Receiver<ExecEvent>,
        terminate: CancellationToken,
    ) -> Self {
        Self {
            stdin,
            events,
            terminate,
        }
    }

    /// Kill the process. Already-buffered output is still delivered.
    pub fn terminate(&self) {
        self.terminate.cancel();
    }
}

/// Spawn a prepared client command (e.g. `kubectl exec ...`) and wire its
/// standard streams into an [`ExecStream`].
pub(crate) fn spawn_exec(mut command: Command, with_stdin: bool) -> OrchestratorResult<ExecStream> {
    command
        .stdin(if with_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| OrchestratorError::CommandFailed {
        command: "exec".to_string(),
        message: e.to_string(),
    })?;

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let terminate = CancellationToken::new();
    // Cancelled once the process is gone, so stdin closes with it.
    let exited = CancellationToken::new();

    let stdin = match child.stdin.take() {
        Some(mut pipe) if with_stdin => {
            let (input_tx, mut input_rx) = mpsc::channel::<Bytes>(INPUT_BUFFER);
            let exited = exited.clone();
            tokio::spawn(async move {
                loop {
                    let chunk = tokio::select! {
                        _ = exited.cancelled() => break,
                        chunk = input_rx.recv() => chunk,
                    };
                    let Some(chunk) = chunk else {
                        break;
                    };
                    if pipe.write_all(&chunk).await.is_err() || pipe.flush().await.is_err() {
                        break;
                    }
                }
                // Dropping the pipe delivers EOF to the remote process.
            });
            Some(ExecInput::new(input_tx))
        }
        _ => None,
    };

    let stdout = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(forward_output(pipe, events_tx.clone(), ExecEvent::Stdout)));
    let stderr = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(forward_output(pipe, events_tx.clone(), ExecEvent::Stderr)));

    let token = terminate.clone();
    tokio::spawn(async move {
        let exit = wait_for_exit(&mut child, &token, &events_tx).await;
        exited.cancel();

        for reader in [stdout, stderr].into_iter().flatten() {
            let _ = reader.await;
        }

        debug!("exec finished: {:?}", exit);
        let _ = events_tx.send(ExecEvent::Exited(exit)).await;
    });

    Ok(ExecStream::new(stdin, events_rx, terminate))
}

async fn wait_for_exit(
    child: &mut Child,
    terminate: &CancellationToken,
    events: &mpsc::Sender<ExecEvent>,
) -> ExecExit {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => ExecExit {
                code: status.code(),
                message: None,
            },
            Err(e) => ExecExit {
                code: None,
                message: Some(e.to_string()),
            },
        },
        _ = terminate.cancelled() => {
            kill_child(child).await;
            ExecExit {
                code: None,
                message: Some("terminated".to_string()),
            }
        }
        _ = events.closed() => {
            kill_child(child).await;
            ExecExit {
                code: None,
                message: Some("stream dropped".to_string()),
            }
        }
    }
}

async fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!("failed to kill exec process: {:?}", e);
    }
}

async fn forward_output<R>(
    mut pipe: R,
    events: mpsc::Sender<ExecEvent>,
    wrap: fn(Bytes) -> ExecEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if events
                    .send(wrap(Bytes::copy_from_slice(&buf[..n])))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                debug!("exec pipe read failed: {:?}", e);
                break;
            }
        }
    }
}
