//! In-memory session registry.
//!
//! Every accessor clones out of the map so no shard guard outlives the call
//! (and in particular never crosses an `.await`).

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::models::Session;
use crate::terminal::TerminalShell;

/// A registered session plus the resources it owns.
#[derive(Debug)]
pub struct SessionEntry {
    pub session: Session,
    /// Cancels the session's monitor loop.
    pub monitor: CancellationToken,
    /// Interactive shell parked while no client is attached.
    pub shell: Option<TerminalShell>,
}

impl SessionEntry {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            monitor: CancellationToken::new(),
            shell: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: DashMap<String, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, returning its monitor token.
    pub fn insert(&self, session: Session) -> CancellationToken {
        let entry = SessionEntry::new(session);
        let token = entry.monitor.clone();
        self.entries.insert(entry.session.id.clone(), entry);
        token
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.entries.get(id).map(|e| e.session.clone())
    }

    /// Mutate a session in place.
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.entries.get_mut(id).map(|mut e| f(&mut e.session))
    }

    pub fn remove(&self, id: &str) -> Option<SessionEntry> {
        self.entries.remove(id).map(|(_, entry)| entry)
    }

    /// Live sessions owned by `user_id`.
    pub fn find_by_user(&self, user_id: &str) -> Vec<Session> {
        self.entries
            .iter()
            .filter(|e| e.session.is_live_for(user_id))
            .map(|e| e.session.clone())
            .collect()
    }

    /// All sessions, oldest first.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.entries.iter().map(|e| e.session.clone()).collect();
        sessions.sort_by_key(|s| s.created);
        sessions
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Record activity. Returns false for unknown ids.
    pub fn touch(&self, id: &str) -> bool {
        self.update(id, Session::touch).is_some()
    }

    /// Sessions idle for strictly longer than `timeout` at `now`.
    pub fn idle_ids(&self, now: Instant, timeout: Duration) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.session.idle_for(now) > timeout)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Take the parked shell, leaving the slot empty.
    pub fn take_shell(&self, id: &str) -> Option<TerminalShell> {
        self.entries.get_mut(id).and_then(|mut e| e.shell.take())
    }

    /// Park a shell for the next attach.
    ///
    /// Hands the shell back when the session is gone or already holds one;
    /// the caller owns terminating it.
    pub fn park_shell(&self, id: &str, shell: TerminalShell) -> Result<(), TerminalShell> {
        match self.entries.get_mut(id) {
            Some(mut entry) if entry.shell.is_none() => {
                entry.shell = Some(shell);
                Ok(())
            }
            _ => Err(shell),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
