//! Repo supervisor: owns the opportunity store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::engine::supervisor::Supervisable;
use crate::engine::worker::{Worker, WorkerTask};
use crate::storage::{OpportunityStore, SqliteStore, StoreError};
use crate::types::Opportunity;

pub const NAME: &str = "Repo";

/// Where the database lives.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreLocation {
    File(PathBuf),
    Memory,
}

impl From<&StorageConfig> for StoreLocation {
    fn from(cfg: &StorageConfig) -> Self {
        if cfg.path.as_os_str() == ":memory:" {
            StoreLocation::Memory
        } else {
            StoreLocation::File(cfg.path.clone())
        }
    }
}

/// Pings the store on a fixed cadence.
struct DatabaseWorker {
    store: SqliteStore,
}

#[async_trait]
impl WorkerTask for DatabaseWorker {
    fn name(&self) -> &str {
        "DatabaseWorker"
    }

    async fn run_once(&self) -> Result<()> {
        self.store.ping().await
    }
}

pub struct RepoSupervisor {
    location: StoreLocation,
    cadence: Duration,
    store: RwLock<Option<SqliteStore>>,
    healthy: AtomicBool,
}

impl RepoSupervisor {
    pub fn new(location: StoreLocation, cadence: Duration) -> Self {
        Self {
            location,
            cadence,
            store: RwLock::new(None),
            healthy: AtomicBool::new(false),
        }
    }

    fn store(&self) -> Result<SqliteStore> {
        self.store.read().clone().ok_or_else(|| StoreError::Closed.into())
    }

    async fn open(&self) -> Result<SqliteStore> {
        match &self.location {
            StoreLocation::File(path) => SqliteStore::open(path).await,
            StoreLocation::Memory => SqliteStore::in_memory().await,
        }
    }
}

#[async_trait]
impl Supervisable for RepoSupervisor {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&self) -> Result<Vec<Worker>> {
        // A restart reopens from scratch.
        let previous = self.store.write().take();
        if let Some(previous) = previous {
            previous.close().await;
        }

        let store = self.open().await?;
        *self.store.write() = Some(store.clone());
        self.healthy.store(true, Ordering::SeqCst);

        Ok(vec![Worker::new(DatabaseWorker { store }, self.cadence)])
    }

    async fn main_loop(&self) -> Result<()> {
        let outcome = match self.store() {
            Ok(store) => store.ping().await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => {
                self.healthy.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                // Reported by the health sweep; the store reopens on restart.
                self.healthy.store(false, Ordering::SeqCst);
                Err(e).context("opportunity store unreachable")
            }
        }
    }

    async fn cleanup(&self) -> Result<()> {
        let store = self.store.write().take();
        if let Some(store) = store {
            store.close().await;
            info!("Opportunity store closed");
        }
        self.healthy.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn self_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OpportunityStore for RepoSupervisor {
    async fn store_opportunities(&self, opportunities: Vec<Opportunity>) -> Result<Vec<i64>> {
        self.store()?.store_opportunities(opportunities).await
    }

    async fn get_active_opportunities(&self, limit: usize) -> Result<Vec<Opportunity>> {
        self.store()?.get_active_opportunities(limit).await
    }

    async fn mark_executed(&self, id: i64) -> Result<()> {
        let store = self.store()?;
        store.mark_executed(id).await?;
        debug!(id, "Opportunity executed");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.store()?.ping().await
    }
}
