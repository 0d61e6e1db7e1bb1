//! Bridges a WebSocket client to an interactive shell inside a pod.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::orchestrator::{ExecEvent, ExecExit, ExecInput, ExecStream};
use crate::session::{SessionError, SessionService};

use super::framing::LineFramer;
use super::types::{ClientMessage, CloseReason, TerminalEvent};
use super::{DisconnectPolicy, TerminalConfig};

/// Outbound message buffer per connection.
const OUTBOUND_BUFFER: usize = 128;

/// How long to wait for queued frames to reach a closing client.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Normal closure.
const CLOSE_NORMAL: u16 = 1000;

/// Server-side failure.
const CLOSE_INTERNAL: u16 = 1011;

/// Why the bridge loop stopped.
#[derive(Debug)]
enum BridgeEnd {
    /// The shell exited (or its stream ended without a status).
    ShellExited(Option<ExecExit>),
    /// The registry closed this connection.
    Closed(CloseReason),
    /// The client closed or the socket failed.
    ClientGone,
}

/// How [`pump_output`] stopped.
#[derive(Debug, PartialEq, Eq)]
pub enum PumpEnd {
    /// The shell exited; `None` if its stream ended without a status.
    Exited(Option<ExecExit>),
    /// Nobody is reading the outbound channel any more.
    Disconnected,
}

/// Shell output read off the exec stream but not yet handed to a client.
///
/// Lives outside the pump so that output survives a dropped connection and
/// is replayed to the next one.
#[derive(Debug, Default)]
pub struct PendingOutput {
    framer: LineFramer,
    queue: VecDeque<TerminalEvent>,
    finished: bool,
    exit: Option<ExecExit>,
}

impl PendingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether anything is waiting for a client, including a partial line.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && !self.framer.has_pending()
    }

    /// Whether the shell's exit has already been read.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn push_stdout(&mut self, chunk: &[u8]) {
        let lines = self.framer.push(chunk);
        self.queue
            .extend(lines.into_iter().map(|data| TerminalEvent::TerminalOutput { data }));
    }

    fn push_partial(&mut self) {
        if let Some(data) = self.framer.flush() {
            self.queue.push_back(TerminalEvent::TerminalOutput { data });
        }
    }

    fn finish(&mut self, exit: Option<ExecExit>) {
        if let Some(data) = self.framer.finish() {
            self.queue.push_back(TerminalEvent::TerminalOutput { data });
        }
        self.finished = true;
        self.exit = exit;
    }
}

/// An interactive shell together with the output no client has seen yet.
#[derive(Debug)]
pub struct TerminalShell {
    pub stream: ExecStream,
    pub pending: PendingOutput,
}

impl TerminalShell {
    pub fn new(stream: ExecStream) -> Self {
        Self {
            stream,
            pending: PendingOutput::new(),
        }
    }

    /// Whether the shell can still take input.
    pub fn is_alive(&self) -> bool {
        !self.pending.is_finished()
            && self
                .stream
                .stdin
                .as_ref()
                .is_some_and(|input| !input.is_closed())
    }

    pub fn terminate(&self) {
        self.stream.terminate();
    }
}

/// Forward shell output to the client as terminal events until the shell
/// exits or the outbound channel closes.
///
/// Stdout is line-framed: complete lines go out at once, a trailing partial
/// line after `flush_delay` of quiet. Stderr is forwarded unbuffered.
/// Output is only removed from `pending` once a slot on `out` is reserved
/// for it, so dropping this future loses nothing.
pub async fn pump_output(
    events: &mut mpsc::Receiver<ExecEvent>,
    out: &mpsc::Sender<TerminalEvent>,
    flush_delay: Duration,
    pending: &mut PendingOutput,
) -> PumpEnd {
    let flush = tokio::time::sleep(flush_delay);
    tokio::pin!(flush);
    let mut armed = pending.framer.has_pending();

    loop {
        while !pending.queue.is_empty() {
            let Ok(permit) = out.reserve().await else {
                return PumpEnd::Disconnected;
            };
            if let Some(event) = pending.queue.pop_front() {
                permit.send(event);
            }
        }

        if pending.finished {
            return PumpEnd::Exited(pending.exit.take());
        }

        tokio::select! {
            event = events.recv() => match event {
                Some(ExecEvent::Stdout(chunk)) => {
                    pending.push_stdout(&chunk);
                    armed = pending.framer.has_pending();
                    if armed {
                        flush.as_mut().reset(Instant::now() + flush_delay);
                    }
                }
                Some(ExecEvent::Stderr(chunk)) => {
                    let data = String::from_utf8_lossy(&chunk).into_owned();
                    pending.queue.push_back(TerminalEvent::TerminalError { data });
                }
                Some(ExecEvent::Exited(exit)) => pending.finish(Some(exit)),
                None => pending.finish(None),
            },
            _ = &mut flush, if armed => {
                armed = false;
                pending.push_partial();
            }
        }
    }
}

/// Serve one terminal WebSocket for `session_id`.
pub async fn attach(
    sessions: Arc<SessionService>,
    terminal: TerminalConfig,
    session_id: Option<String>,
    mut socket: WebSocket,
) {
    let Some(session_id) = session_id.filter(|id| !id.trim().is_empty()) else {
        reject(&mut socket, CloseReason::MissingSession.code(), CloseReason::MissingSession.reason()).await;
        return;
    };

    let reason = match sessions.get_session(&session_id) {
        Err(_) => Some(CloseReason::UnknownSession),
        Ok(session) if !session.ready => Some(CloseReason::NotReady),
        Ok(_) => None,
    };
    if let Some(reason) = reason {
        debug!("Refusing terminal for session {}: {}", session_id, reason.reason());
        reject(&mut socket, reason.code(), reason.reason()).await;
        return;
    }

    let shell = match sessions.open_shell(&session_id, &terminal).await {
        Ok(shell) => shell,
        Err(e) => {
            warn!("Failed to open shell for session {}: {}", session_id, e);
            let (code, text) = match e {
                SessionError::NotFound(_) => (
                    CloseReason::UnknownSession.code(),
                    CloseReason::UnknownSession.reason(),
                ),
                SessionError::NotReady(_) => {
                    (CloseReason::NotReady.code(), CloseReason::NotReady.reason())
                }
                _ => (CLOSE_INTERNAL, "failed to open shell"),
            };
            reject(&mut socket, code, text).await;
            return;
        }
    };

    let TerminalShell {
        stream: ExecStream {
            stdin,
            mut events,
            terminate,
        },
        mut pending,
    } = shell;

    let registration = sessions.connections().register(&session_id, stdin.clone());
    let _ = sessions.touch(&session_id);
    info!("Terminal attached to session {} (connection {})", session_id, registration.id);

    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<TerminalEvent>(OUTBOUND_BUFFER);
    let (close_tx, close_rx) = oneshot::channel::<CloseFrame>();

    // Events first, then the close frame once every event sender is gone.
    let send_task = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    warn!("Failed to serialize terminal event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        if let Ok(frame) = close_rx.await {
            let _ = sender.send(Message::Close(Some(frame))).await;
        }
        let _ = sender.close().await;
    });

    let mut closed = registration.closed;
    let end = {
        let pump = pump_output(&mut events, &out_tx, terminal.flush_delay(), &mut pending);
        tokio::pin!(pump);

        loop {
            tokio::select! {
                pumped = &mut pump => match pumped {
                    PumpEnd::Exited(exit) => break BridgeEnd::ShellExited(exit),
                    PumpEnd::Disconnected => break BridgeEnd::ClientGone,
                },
                reason = &mut closed => {
                    break BridgeEnd::Closed(reason.unwrap_or(CloseReason::Deleted));
                }
                frame = receiver.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let _ = sessions.touch(&session_id);
                        let bytes = ClientMessage::parse(text.as_str()).into_bytes();
                        forward_input(stdin.as_ref(), bytes, &session_id).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let _ = sessions.touch(&session_id);
                        forward_input(stdin.as_ref(), data.to_vec(), &session_id).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break BridgeEnd::ClientGone,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Terminal socket error for session {}: {}", session_id, e);
                        break BridgeEnd::ClientGone;
                    }
                },
            }
        }
    };

    sessions.connections().deregister(&session_id, registration.id);

    match end {
        BridgeEnd::ShellExited(exit) => {
            let code = exit.as_ref().and_then(|e| e.code);
            info!("Shell for session {} exited ({:?})", session_id, code);
            let _ = out_tx.send(TerminalEvent::TerminalExit { code }).await;
            let _ = close_tx.send(close_frame(CLOSE_NORMAL, "shell exited"));
            terminate.cancel();
        }
        BridgeEnd::Closed(reason) => {
            info!(
                "Terminal for session {} closed: {}",
                session_id,
                reason.reason()
            );
            let _ = close_tx.send(close_frame(reason.code(), reason.reason()));
            terminate.cancel();
        }
        BridgeEnd::ClientGone => {
            info!("Terminal client for session {} disconnected", session_id);
            match terminal.disconnect_policy {
                DisconnectPolicy::Detach => {
                    let stream = ExecStream::new(stdin, events, terminate);
                    sessions.park_shell(&session_id, TerminalShell { stream, pending });
                }
                DisconnectPolicy::Terminate => terminate.cancel(),
            }
        }
    }

    drop(out_tx);
    if tokio::time::timeout(DRAIN_TIMEOUT, send_task).await.is_err() {
        debug!("Terminal client for session {} did not drain in time", session_id);
    }
}

async fn forward_input(stdin: Option<&ExecInput>, bytes: Vec<u8>, session_id: &str) {
    let Some(input) = stdin else {
        return;
    };
    if let Err(e) = input.write(bytes).await {
        debug!("Dropping terminal input for session {}: {}", session_id, e);
    }
}

fn close_frame(code: u16, reason: &'static str) -> CloseFrame {
    CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    }
}

/// Close a socket before any bridging starts.
async fn reject(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let _ = socket.send(Message::Close(Some(close_frame(code, reason)))).await;
}
