//! Supervisors own a set of workers plus a main loop, and expose a uniform
//! lifecycle to the orchestrator.
//!
//! Concrete supervisors implement [`Supervisable`] (the four hooks) and are
//! wrapped in a [`Supervisor`], which supplies the shared behaviour:
//! worker bookkeeping, the main-loop schedule, and health aggregation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::worker::{panic_message, Worker};
use super::SupervisorError;
use crate::config::RuntimeConfig;

/// Hooks a concrete supervisor provides.
#[async_trait]
pub trait Supervisable: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Acquire resources and build (but don't start) the workers.
    async fn initialize(&self) -> Result<Vec<Worker>>;

    /// One iteration of the supervisor's own loop. Errors are logged and
    /// retried after the cool-down; a panic crashes the supervisor.
    async fn main_loop(&self) -> Result<()>;

    /// Release resources. Called once workers have been stopped.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    /// Supervisor-specific health on top of worker health.
    fn self_healthy(&self) -> bool {
        true
    }
}

/// The lifecycle the orchestrator drives.
#[async_trait]
pub trait Runnable: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Run the main loop until stopped. Returns `Err` only on a crash.
    async fn run(&self) -> Result<(), SupervisorError>;

    fn is_healthy(&self) -> bool;

    fn worker_count(&self) -> usize;
}

/// Timing knobs shared by every supervisor.
#[derive(Debug, Clone, Copy)]
pub struct LoopTiming {
    pub tick: Duration,
    pub cooldown: Duration,
    pub stale_after: Duration,
}

impl From<&RuntimeConfig> for LoopTiming {
    fn from(cfg: &RuntimeConfig) -> Self {
        Self {
            tick: cfg.tick(),
            cooldown: cfg.main_loop_cooldown(),
            stale_after: cfg.heartbeat_stale_after(),
        }
    }
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

pub struct Supervisor<S: Supervisable> {
    inner: Arc<S>,
    workers: Mutex<Vec<Worker>>,
    started: AtomicBool,
    timing: LoopTiming,
}

impl<S: Supervisable> Supervisor<S> {
    pub fn new(inner: S, timing: LoopTiming) -> Self {
        Self::from_arc(Arc::new(inner), timing)
    }

    pub fn from_arc(inner: Arc<S>, timing: LoopTiming) -> Self {
        Self {
            inner,
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            timing,
        }
    }

    /// The concrete supervisor, for sibling supervisors that consume its
    /// public operations.
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn worker_names(&self) -> Vec<String> {
        self.workers
            .lock()
            .iter()
            .map(|w| w.name().to_string())
            .collect()
    }

    fn stop_workers(&self) -> usize {
        let mut workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers.iter_mut() {
            worker.stop();
        }
        workers.len()
    }
}

#[async_trait]
impl<S: Supervisable> Runnable for Supervisor<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn start(&self) -> Result<()> {
        // A restart must not leave the previous generation running.
        let leftover = self.stop_workers();
        if leftover > 0 {
            debug!(supervisor = %self.name(), leftover, "Stopped leftover workers before start");
        }

        let mut workers = self
            .inner
            .initialize()
            .await
            .with_context(|| format!("initializing {}", self.name()))?;
        for worker in workers.iter_mut() {
            worker.start();
        }
        let count = workers.len();
        *self.workers.lock() = workers;
        self.started.store(true, Ordering::SeqCst);

        info!(supervisor = %self.name(), workers = count, "Supervisor started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        let stopped = self.stop_workers();
        self.inner
            .cleanup()
            .await
            .with_context(|| format!("cleaning up {}", self.name()))?;
        info!(supervisor = %self.name(), workers = stopped, "Supervisor stopped");
        Ok(())
    }

    async fn run(&self) -> Result<(), SupervisorError> {
        while self.is_started() {
            match AssertUnwindSafe(self.inner.main_loop()).catch_unwind().await {
                Ok(Ok(())) => tokio::time::sleep(self.timing.tick).await,
                Ok(Err(e)) => {
                    error!(
                        supervisor = %self.name(),
                        error = %format!("{e:#}"),
                        cooldown_secs = self.timing.cooldown.as_secs(),
                        "Main loop error"
                    );
                    tokio::time::sleep(self.timing.cooldown).await;
                }
                Err(panic) => {
                    return Err(SupervisorError::crashed(
                        self.name(),
                        format!("main loop panicked: {}", panic_message(panic.as_ref())),
                    ));
                }
            }
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.inner.self_healthy()
            && self
                .workers
                .lock()
                .iter()
                .all(|w| w.is_healthy(self.timing.stale_after))
    }

    fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::worker::WorkerTask;
    use std::sync::atomic::AtomicU32;

    struct Tick(&'static str);

    #[async_trait]
    impl WorkerTask for Tick {
        fn name(&self) -> &str {
            self.0
        }

        async fn run_once(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        inits: AtomicU32,
        loops: AtomicU32,
        cleanups: AtomicU32,
        /// main_loop returns an ordinary error on these iterations (1-based).
        soft_fail_on: Vec<u32>,
        /// main_loop panics on this iteration.
        crash_on: Option<u32>,
        healthy: AtomicBool,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                healthy: AtomicBool::new(true),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Supervisable for Recorder {
        fn name(&self) -> &str {
            "Recorder"
        }

        async fn initialize(&self) -> Result<Vec<Worker>> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                Worker::new(Tick("A"), Duration::from_secs(10)),
                Worker::new(Tick("B"), Duration::from_secs(10)),
            ])
        }

        async fn main_loop(&self) -> Result<()> {
            let n = self.loops.fetch_add(1, Ordering::SeqCst) + 1;
            if self.crash_on == Some(n) {
                panic!("lost its marbles");
            }
            if self.soft_fail_on.contains(&n) {
                anyhow::bail!("transient hiccup");
            }
            Ok(())
        }

        async fn cleanup(&self) -> Result<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn self_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn timing() -> LoopTiming {
        LoopTiming {
            tick: Duration::from_secs(1),
            cooldown: Duration::from_secs(5),
            stale_after: Duration::from_secs(300),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop() {
        let sup = Supervisor::new(Recorder::new(), timing());
        sup.start().await.unwrap();
        assert!(sup.is_started());
        assert_eq!(sup.worker_count(), 2);
        assert_eq!(sup.worker_names(), vec!["A", "B"]);

        sup.stop().await.unwrap();
        assert!(!sup.is_started());
        assert_eq!(sup.worker_count(), 0);
        assert_eq!(sup.inner().cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_workers() {
        let sup = Supervisor::new(Recorder::new(), timing());
        sup.start().await.unwrap();
        sup.start().await.unwrap();
        assert_eq!(sup.inner().inits.load(Ordering::SeqCst), 2);
        assert_eq!(sup.worker_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_error_cools_down_and_continues() {
        let recorder = Recorder {
            soft_fail_on: vec![1],
            ..Recorder::new()
        };
        let sup = Arc::new(Supervisor::new(recorder, timing()));
        sup.start().await.unwrap();

        let runner = Arc::clone(&sup);
        let handle = tokio::spawn(async move { runner.run().await });

        // First iteration fails: nothing else happens during the cool-down.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(sup.inner().loops.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(sup.inner().loops.load(Ordering::SeqCst) >= 2);
        assert!(!handle.is_finished());

        sup.stop().await.unwrap();
        let outcome = handle.await.unwrap();
        assert!(outcome.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_escapes_run() {
        let recorder = Recorder {
            crash_on: Some(3),
            ..Recorder::new()
        };
        let sup = Supervisor::new(recorder, timing());
        sup.start().await.unwrap();

        let err = sup.run().await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Crashed { ref reason, .. } if reason.contains("lost its marbles")
        ));
        assert_eq!(sup.inner().loops.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_combines_self_and_workers() {
        let sup = Supervisor::new(Recorder::new(), timing());
        sup.start().await.unwrap();
        assert!(sup.is_healthy());

        sup.inner().healthy.store(false, Ordering::SeqCst);
        assert!(!sup.is_healthy());
        sup.inner().healthy.store(true, Ordering::SeqCst);

        // Ticks succeed every 10s, so heartbeats stay fresh.
        tokio::time::sleep(Duration::from_secs(400)).await;
        assert!(sup.is_healthy());

        // Stop the workers without dropping them: heartbeats go stale.
        for worker in sup.workers.lock().iter_mut() {
            worker.stop();
        }
        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(!sup.is_healthy());

        // One fresh beat from each worker brings it straight back.
        for worker in sup.workers.lock().iter() {
            worker.heartbeat();
        }
        assert!(sup.is_healthy());
    }
}
