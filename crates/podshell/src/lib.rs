//! podshell - disposable per-user sandbox pods with a streamed shell.
//!
//! Library crate behind the `podshell` binary; exposed so integration tests
//! can drive the service with a scripted orchestrator.

pub mod api;
pub mod orchestrator;
pub mod session;
pub mod terminal;
