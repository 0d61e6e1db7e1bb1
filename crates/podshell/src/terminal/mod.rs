//! Interactive terminal bridging between a WebSocket client and a pod shell.

pub mod bridge;
mod connections;
pub mod framing;
mod types;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use bridge::{PendingOutput, PumpEnd, TerminalShell, attach, pump_output};
pub use connections::{ConnectionRegistry, Registration};
pub use framing::LineFramer;
pub use types::{ClientMessage, CloseReason, TerminalEvent};

use crate::orchestrator::ExecRequest;

/// What happens to the shell when its client goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectPolicy {
    /// Keep the shell running and hand it to the next client.
    #[default]
    Detach,
    /// Kill the shell.
    Terminate,
}

/// Interactive terminal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Shell started inside the pod.
    pub shell_command: Vec<String>,
    /// Allocate a pseudo terminal for the shell.
    pub tty: bool,
    /// How long a partial output line waits before it is sent.
    pub flush_delay_ms: u64,
    pub disconnect_policy: DisconnectPolicy,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell_command: vec!["/bin/bash".to_string(), "-i".to_string()],
            tty: false,
            flush_delay_ms: 100,
            disconnect_policy: DisconnectPolicy::Detach,
        }
    }
}

impl TerminalConfig {
    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    pub fn shell_request(&self) -> ExecRequest {
        ExecRequest::interactive(self.shell_command.iter().cloned(), self.tty)
    }
}
