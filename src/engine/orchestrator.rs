//! Orchestrator: starts supervisors in registration order, restarts them
//! when they crash, sweeps their health, and tears everything down in
//! reverse order.
//!
//! A supervisor that crashes `max_restarts` times is marked `Failed` and
//! reported through [`Orchestrator::next_failure`]; with the default of 3
//! that is one start plus two restarts.

use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::supervisor::Runnable;
use super::worker::panic_message;
use super::{SupervisorError, SupervisorState};
use crate::config::RuntimeConfig;

/// Point-in-time view of one supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorStatus {
    pub name: String,
    pub state: SupervisorState,
    pub restarts: u32,
    pub workers: usize,
    pub healthy: bool,
}

#[derive(Debug, Clone, Copy)]
struct RestartPolicy {
    max_restarts: u32,
    backoff: Duration,
}

struct Slot {
    supervisor: Arc<dyn Runnable>,
    state: Mutex<SupervisorState>,
    crashes: AtomicU32,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Slot {
    fn name(&self) -> &str {
        self.supervisor.name()
    }

    fn state(&self) -> SupervisorState {
        *self.state.lock()
    }

    fn set_state(&self, state: SupervisorState) {
        *self.state.lock() = state;
    }
}

pub struct Orchestrator {
    config: RuntimeConfig,
    slots: Vec<Arc<Slot>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    last_sweep: Arc<Mutex<Vec<String>>>,
    failures_tx: mpsc::UnboundedSender<SupervisorError>,
    failures_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<SupervisorError>>,
}

impl Orchestrator {
    pub fn new(config: RuntimeConfig) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            config,
            slots: Vec::new(),
            health_task: Mutex::new(None),
            last_sweep: Arc::new(Mutex::new(Vec::new())),
            failures_tx,
            failures_rx: tokio::sync::Mutex::new(failures_rx),
        }
    }

    /// Add a supervisor. Registration order is start order.
    pub fn register(&mut self, supervisor: Arc<dyn Runnable>) -> Result<(), SupervisorError> {
        let name = supervisor.name().to_string();
        if self.slots.iter().any(|s| s.name() == name) {
            return Err(SupervisorError::DuplicateName(name));
        }
        debug!(supervisor = %name, "Registered supervisor");
        self.slots.push(Arc::new(Slot {
            supervisor,
            state: Mutex::new(SupervisorState::NotStarted),
            crashes: AtomicU32::new(0),
            task: Mutex::new(None),
        }));
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.name().to_string()).collect()
    }

    /// Start every supervisor in order, spawn its restart wrapper, then
    /// start the health sweep. Stops at the first supervisor that fails to
    /// start; those already running stay up for `stop_all` to tear down.
    pub async fn start_all(&self) -> Result<(), SupervisorError> {
        info!(count = self.slots.len(), "Starting supervisors");
        let policy = RestartPolicy {
            max_restarts: self.config.max_restarts,
            backoff: self.config.restart_backoff(),
        };

        for slot in &self.slots {
            slot.set_state(SupervisorState::Starting);
            if let Err(e) = slot.supervisor.start().await {
                slot.set_state(SupervisorState::Failed);
                let err = SupervisorError::StartFailed {
                    name: slot.name().to_string(),
                    reason: format!("{e:#}"),
                };
                error!(supervisor = %slot.name(), error = %err, "Supervisor failed to start");
                return Err(err);
            }
            slot.set_state(SupervisorState::Running);

            let handle = tokio::spawn(supervise(
                Arc::clone(slot),
                policy,
                self.failures_tx.clone(),
            ));
            *slot.task.lock() = Some(handle);
        }

        let sweep = tokio::spawn(health_sweep(
            self.slots.clone(),
            self.config.health_interval(),
            Arc::clone(&self.last_sweep),
        ));
        *self.health_task.lock() = Some(sweep);

        info!("All supervisors running");
        Ok(())
    }

    /// Stop everything in reverse registration order. Errors are logged
    /// and shutdown continues with the next supervisor.
    pub async fn stop_all(&self) {
        info!("Stopping supervisors");
        if let Some(sweep) = self.health_task.lock().take() {
            sweep.abort();
        }

        for slot in self.slots.iter().rev() {
            // Cancel the wrapper first so it can't restart what we stop.
            if let Some(task) = slot.task.lock().take() {
                task.abort();
            }
            let failed = slot.state() == SupervisorState::Failed;
            if !failed {
                slot.set_state(SupervisorState::Stopping);
            }

            match slot.supervisor.stop().await {
                Ok(()) => debug!(supervisor = %slot.name(), "Supervisor stopped"),
                Err(e) => warn!(
                    supervisor = %slot.name(),
                    error = %format!("{e:#}"),
                    "Error stopping supervisor, continuing shutdown"
                ),
            }
            if !failed {
                slot.set_state(SupervisorState::Stopped);
            }
        }
        info!("All supervisors stopped");
    }

    /// Wait for a supervisor to exhaust its restarts.
    pub async fn next_failure(&self) -> Option<SupervisorError> {
        self.failures_rx.lock().await.recv().await
    }

    pub fn state_of(&self, name: &str) -> Option<SupervisorState> {
        self.slots.iter().find(|s| s.name() == name).map(|s| s.state())
    }

    pub fn status(&self) -> Vec<SupervisorStatus> {
        self.slots
            .iter()
            .map(|slot| SupervisorStatus {
                name: slot.name().to_string(),
                state: slot.state(),
                restarts: slot.crashes.load(Ordering::SeqCst),
                workers: slot.supervisor.worker_count(),
                healthy: slot.supervisor.is_healthy(),
            })
            .collect()
    }

    /// Names of supervisors currently reporting unhealthy.
    pub fn unhealthy(&self) -> Vec<String> {
        unhealthy_names(&self.slots)
    }

    /// Result of the most recent background health sweep.
    pub fn last_sweep(&self) -> Vec<String> {
        self.last_sweep.lock().clone()
    }

    pub fn any_failed(&self) -> bool {
        self.slots
            .iter()
            .any(|s| s.state() == SupervisorState::Failed)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(sweep) = self.health_task.lock().take() {
            sweep.abort();
        }
        for slot in &self.slots {
            if let Some(task) = slot.task.lock().take() {
                task.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Run a supervisor's main loop, restarting it after crashes until the
/// restart budget is spent.
async fn supervise(
    slot: Arc<Slot>,
    policy: RestartPolicy,
    failures: mpsc::UnboundedSender<SupervisorError>,
) {
    let mut pending_crash: Option<String> = None;

    loop {
        let reason = match pending_crash.take() {
            Some(reason) => reason,
            None => match AssertUnwindSafe(slot.supervisor.run()).catch_unwind().await {
                Ok(Ok(())) => {
                    debug!(supervisor = %slot.name(), "Main loop exited");
                    return;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            },
        };

        let crashes = slot.crashes.fetch_add(1, Ordering::SeqCst) + 1;
        slot.set_state(SupervisorState::Crashed);
        warn!(supervisor = %slot.name(), crashes, error = %reason, "Supervisor crashed");

        if crashes >= policy.max_restarts {
            slot.set_state(SupervisorState::Failed);
            error!(
                supervisor = %slot.name(),
                crashes,
                max_restarts = policy.max_restarts,
                "Restart budget exhausted"
            );
            let failure = SupervisorError::RestartsExhausted {
                name: slot.name().to_string(),
                crashes,
                last_error: reason,
            };
            if let Err(unsent) = failures.send(failure) {
                warn!(
                    supervisor = %slot.name(),
                    failure = %unsent.0,
                    "No listener for supervisor failure"
                );
            }
            return;
        }

        slot.set_state(SupervisorState::Restarting);
        info!(
            supervisor = %slot.name(),
            attempt = crashes,
            max_restarts = policy.max_restarts,
            backoff_secs = policy.backoff.as_secs(),
            "Restarting supervisor"
        );
        tokio::time::sleep(policy.backoff).await;

        match slot.supervisor.start().await {
            Ok(()) => slot.set_state(SupervisorState::Running),
            Err(e) => pending_crash = Some(format!("restart failed: {e:#}")),
        }
    }
}

fn unhealthy_names(slots: &[Arc<Slot>]) -> Vec<String> {
    slots
        .iter()
        .filter(|s| !s.supervisor.is_healthy())
        .map(|s| s.name().to_string())
        .collect()
}

async fn health_sweep(slots: Vec<Arc<Slot>>, interval: Duration, last: Arc<Mutex<Vec<String>>>) {
    loop {
        tokio::time::sleep(interval).await;
        let unhealthy = unhealthy_names(&slots);
        if unhealthy.is_empty() {
            debug!("Health sweep: all supervisors healthy");
        } else {
            warn!(unhealthy = %unhealthy.join(", "), "Health sweep found unhealthy supervisors");
        }
        *last.lock() = unhealthy;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
