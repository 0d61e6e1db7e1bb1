//! Interactive terminal message types.

use serde::{Deserialize, Serialize};

/// Server-to-client terminal message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalEvent {
    /// A complete line (with its `\n`) or a flushed partial line of stdout.
    TerminalOutput { data: String },
    /// A stderr chunk, forwarded unbuffered.
    TerminalError { data: String },
    /// The shell exited.
    TerminalExit { code: Option<i32> },
}

/// Client-to-server terminal message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `{"type":"terminal_input","command":...}`
    Input { command: String },
    /// Anything else: keystrokes or a pasted line.
    Raw(String),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Envelope {
    TerminalInput { command: String },
}

impl ClientMessage {
    /// Parse a text frame. Text that is not a `terminal_input` envelope is raw input.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Envelope>(text) {
            Ok(Envelope::TerminalInput { command }) => ClientMessage::Input { command },
            Err(_) => ClientMessage::Raw(text.to_string()),
        }
    }

    /// Bytes to write into the shell's stdin.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            ClientMessage::Input { command } => command.into_bytes(),
            ClientMessage::Raw(text) => text.into_bytes(),
        }
    }
}

/// Why the server closed a terminal connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The request named no session.
    MissingSession,
    /// The session does not exist.
    UnknownSession,
    /// The session exists but is not primed yet.
    NotReady,
    /// Another client attached to the same session.
    Superseded,
    /// The session was deleted.
    Deleted,
}

impl CloseReason {
    /// WebSocket close code (application range).
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::MissingSession => 4400,
            CloseReason::UnknownSession => 4404,
            CloseReason::NotReady => 4409,
            CloseReason::Superseded => 4001,
            CloseReason::Deleted => 4002,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            CloseReason::MissingSession => "no session id",
            CloseReason::UnknownSession => "session not found",
            CloseReason::NotReady => "session not ready",
            CloseReason::Superseded => "superseded by another connection",
            CloseReason::Deleted => "session deleted",
        }
    }
}
