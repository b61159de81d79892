//! Core engine: workers, supervisors, the orchestrator that keeps them
//! alive, and the capital ledger they share.

pub mod accountant;
pub mod orchestrator;
pub mod supervisor;
pub mod worker;

use std::fmt;
use thiserror::Error;

/// Supervision failures.
///
/// `Crashed` is what `run()` returns when the main loop panics; the
/// restart wrapper counts it against the restart budget.
#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    #[error("supervisor `{0}` is already registered")]
    DuplicateName(String),

    #[error("supervisor `{name}` failed to start: {reason}")]
    StartFailed { name: String, reason: String },

    #[error("supervisor `{name}` crashed: {reason}")]
    Crashed { name: String, reason: String },

    #[error("supervisor `{name}` crashed {crashes} times, giving up (last error: {last_error})")]
    RestartsExhausted {
        name: String,
        crashes: u32,
        last_error: String,
    },
}

impl SupervisorError {
    pub fn crashed(name: impl Into<String>, reason: impl fmt::Display) -> Self {
        SupervisorError::Crashed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error should take the whole process down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SupervisorError::RestartsExhausted { .. } | SupervisorError::StartFailed { .. }
        )
    }
}

/// Lifecycle of a supervisor as tracked by the orchestrator.
///
/// `NotStarted → Starting → Running → (Crashed → Restarting → Running)*
/// → Stopping → Stopped`, with `Failed` reachable only from `Crashed`
/// (or from `Starting` when the initial start fails).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Starting,
    Running,
    Crashed,
    Restarting,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SupervisorState::NotStarted => "not-started",
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running",
            SupervisorState::Crashed => "crashed",
            SupervisorState::Restarting => "restarting",
            SupervisorState::Stopping => "stopping",
            SupervisorState::Stopped => "stopped",
            SupervisorState::Failed => "failed",
        };
        f.write_str(s)
    }
}
