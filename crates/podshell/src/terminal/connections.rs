//! Registry of attached terminal connections, at most one per session.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use log::debug;
use tokio::sync::oneshot;

use super::types::CloseReason;
use crate::orchestrator::ExecInput;

#[derive(Debug)]
struct Connection {
    id: u64,
    input: Option<ExecInput>,
    close: oneshot::Sender<CloseReason>,
}

/// Handle returned to the bridge that registered a connection.
#[derive(Debug)]
pub struct Registration {
    pub id: u64,
    /// Resolves when the registry closes this connection.
    pub closed: oneshot::Receiver<CloseReason>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Connection>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a session, closing any previous one.
    pub fn register(&self, session_id: &str, input: Option<ExecInput>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        let previous = self.connections.insert(
            session_id.to_string(),
            Connection {
                id,
                input,
                close: tx,
            },
        );

        if let Some(old) = previous {
            debug!(
                "terminal connection {} for session {} superseded by {}",
                old.id, session_id, id
            );
            let _ = old.close.send(CloseReason::Superseded);
        }

        Registration { id, closed: rx }
    }

    /// Remove a connection if it is still the registered one.
    pub fn deregister(&self, session_id: &str, connection_id: u64) -> bool {
        self.connections
            .remove_if(session_id, |_, conn| conn.id == connection_id)
            .is_some()
    }

    /// Force-close the session's connection.
    pub fn close(&self, session_id: &str, reason: CloseReason) -> bool {
        match self.connections.remove(session_id) {
            Some((_, conn)) => {
                let _ = conn.close.send(reason);
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self, session_id: &str) -> bool {
        self.connections.contains_key(session_id)
    }

    /// Input pipe of the attached shell.
    pub fn input(&self, session_id: &str) -> Option<ExecInput> {
        self.connections
            .get(session_id)
            .and_then(|conn| conn.input.clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
