//! Workers: single recurring units of background work.
//!
//! A worker runs its task body on a fixed cadence in its own tokio task.
//! A successful iteration refreshes the heartbeat; a failed (or panicking)
//! iteration is logged, withholds the heartbeat, and the schedule carries
//! on after the usual delay.

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// The body of a worker: one iteration of recurring work.
#[async_trait]
pub trait WorkerTask: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn run_once(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Pulse {
    healthy: bool,
    last_beat: Instant,
    iterations: u64,
    failures: u64,
}

/// Liveness shared between a worker handle and its running loop.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    pulse: Arc<Mutex<Pulse>>,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            pulse: Arc::new(Mutex::new(Pulse {
                healthy: true,
                last_beat: Instant::now(),
                iterations: 0,
                failures: 0,
            })),
        }
    }

    /// Refresh the timestamp and clear the unhealthy flag.
    pub fn beat(&self) {
        let mut pulse = self.pulse.lock();
        pulse.last_beat = Instant::now();
        pulse.healthy = true;
        pulse.iterations += 1;
    }

    /// Record a failed iteration. The timestamp is left untouched.
    pub fn mark_failed(&self) {
        let mut pulse = self.pulse.lock();
        pulse.healthy = false;
        pulse.failures += 1;
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.pulse.lock().last_beat)
    }

    /// Healthy flag set and last beat younger than `stale_after`.
    pub fn is_healthy(&self, stale_after: Duration) -> bool {
        let pulse = self.pulse.lock();
        pulse.healthy && Instant::now().saturating_duration_since(pulse.last_beat) < stale_after
    }

    /// Successful iterations so far.
    pub fn iterations(&self) -> u64 {
        self.pulse.lock().iterations
    }

    pub fn failures(&self) -> u64 {
        self.pulse.lock().failures
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// A cancellable, heartbeat-tracked loop around a [`WorkerTask`].
///
/// Owned exclusively by its supervisor: created in `initialize`, started
/// right after, stopped (and dropped) in `stop`.
pub struct Worker {
    task: Arc<dyn WorkerTask>,
    cadence: Duration,
    heartbeat: Heartbeat,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(task: impl WorkerTask, cadence: Duration) -> Self {
        Self::from_arc(Arc::new(task), cadence)
    }

    pub fn from_arc(task: Arc<dyn WorkerTask>, cadence: Duration) -> Self {
        Self {
            task,
            cadence,
            heartbeat: Heartbeat::new(),
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// Spawn the recurring loop. No-op if already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let task = Arc::clone(&self.task);
        let heartbeat = self.heartbeat.clone();
        let cadence = self.cadence;
        debug!(worker = %task.name(), cadence_secs = cadence.as_secs_f64(), "Worker starting");
        self.handle = Some(tokio::spawn(work_loop(task, heartbeat, cadence)));
    }

    /// Request cancellation. Returns immediately; the loop ends at its
    /// next suspension point.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!(worker = %self.task.name(), "Worker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Mark the current moment as a successful iteration.
    pub fn heartbeat(&self) {
        self.heartbeat.beat();
    }

    pub fn pulse(&self) -> &Heartbeat {
        &self.heartbeat
    }

    pub fn is_healthy(&self, stale_after: Duration) -> bool {
        self.heartbeat.is_healthy(stale_after)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn work_loop(task: Arc<dyn WorkerTask>, heartbeat: Heartbeat, cadence: Duration) {
    loop {
        match AssertUnwindSafe(task.run_once()).catch_unwind().await {
            Ok(Ok(())) => heartbeat.beat(),
            Ok(Err(e)) => {
                heartbeat.mark_failed();
                warn!(worker = %task.name(), error = %format!("{e:#}"), "Worker iteration failed");
            }
            Err(panic) => {
                heartbeat.mark_failed();
                warn!(
                    worker = %task.name(),
                    panic = %panic_message(panic.as_ref()),
                    "Worker iteration panicked"
                );
            }
        }
        tokio::time::sleep(cadence).await;
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const STALE: Duration = Duration::from_secs(300);

    /// Fails on the iterations listed in `fail_on` (1-based), succeeds otherwise.
    struct Scripted {
        calls: Arc<AtomicU32>,
        fail_on: Vec<u32>,
        panic_on: Vec<u32>,
    }

    #[async_trait]
    impl WorkerTask for Scripted {
        fn name(&self) -> &str {
            "Scripted"
        }

        async fn run_once(&self) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.panic_on.contains(&n) {
                panic!("iteration {n} exploded");
            }
            if self.fail_on.contains(&n) {
                anyhow::bail!("iteration {n} failed");
            }
            Ok(())
        }
    }

    fn scripted(fail_on: Vec<u32>, panic_on: Vec<u32>) -> (Worker, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let task = Scripted {
            calls: Arc::clone(&calls),
            fail_on,
            panic_on,
        };
        (Worker::new(task, Duration::from_secs(10)), calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_goes_stale_and_recovers() {
        let (worker, _) = scripted(vec![], vec![]);
        assert!(worker.is_healthy(STALE));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(worker.is_healthy(STALE));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!worker.is_healthy(STALE));

        worker.heartbeat();
        assert!(worker.is_healthy(STALE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_iteration_keeps_schedule() {
        let (mut worker, calls) = scripted(vec![1], vec![]);
        worker.start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!worker.is_healthy(STALE));
        assert_eq!(worker.pulse().failures(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(worker.is_healthy(STALE));
        assert!(worker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_iteration_is_isolated() {
        let (mut worker, calls) = scripted(vec![], vec![1]);
        worker.start();

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(worker.is_running());
        assert!(worker.is_healthy(STALE));
        assert_eq!(worker.pulse().iterations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_loop() {
        let (mut worker, calls) = scripted(vec![], vec![]);
        worker.start();
        tokio::time::sleep(Duration::from_secs(15)).await;
        let seen = calls.load(Ordering::SeqCst);
        assert_eq!(seen, 2);

        worker.stop();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
        assert!(!worker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let (mut worker, calls) = scripted(vec![], vec![]);
        worker.start();
        worker.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
