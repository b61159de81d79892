//! Ingest supervisor: keeps a fresh snapshot of active markets.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::data::MarketSource;
use crate::engine::supervisor::Supervisable;
use crate::engine::worker::{Worker, WorkerTask};
use crate::types::MarketRecord;

pub const NAME: &str = "Ingest";

#[derive(Debug, Clone)]
struct CachedMarkets {
    markets: Vec<MarketRecord>,
    fetched_at: Instant,
}

type MarketCache = Arc<RwLock<Option<CachedMarkets>>>;

fn refresh(cache: &MarketCache, markets: &[MarketRecord]) {
    *cache.write() = Some(CachedMarkets {
        markets: markets.to_vec(),
        fetched_at: Instant::now(),
    });
}

/// Polls the source and refreshes the cache. Errors mark the worker
/// unhealthy; the last good snapshot is kept.
struct MarketIngestWorker {
    source: Arc<dyn MarketSource>,
    cache: MarketCache,
}

#[async_trait]
impl WorkerTask for MarketIngestWorker {
    fn name(&self) -> &str {
        "MarketIngestWorker"
    }

    async fn run_once(&self) -> Result<()> {
        let markets = self.source.fetch_active_markets().await?;
        debug!(count = markets.len(), "Market snapshot refreshed");
        refresh(&self.cache, &markets);
        Ok(())
    }
}

pub struct IngestSupervisor {
    source: Arc<dyn MarketSource>,
    cache: MarketCache,
    max_age: Duration,
    cadence: Duration,
}

impl IngestSupervisor {
    pub fn new(source: Arc<dyn MarketSource>, max_age: Duration, cadence: Duration) -> Self {
        Self {
            source,
            cache: Arc::new(RwLock::new(None)),
            max_age,
            cadence,
        }
    }

    fn fresh_snapshot(&self) -> Option<Vec<MarketRecord>> {
        let cache = self.cache.read();
        cache
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.max_age)
            .map(|c| c.markets.clone())
    }

    /// Age of the cached snapshot, if any.
    pub fn snapshot_age(&self) -> Option<Duration> {
        self.cache.read().as_ref().map(|c| c.fetched_at.elapsed())
    }
}

#[async_trait]
impl Supervisable for IngestSupervisor {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&self) -> Result<Vec<Worker>> {
        let worker = MarketIngestWorker {
            source: Arc::clone(&self.source),
            cache: Arc::clone(&self.cache),
        };
        Ok(vec![Worker::new(worker, self.cadence)])
    }

    async fn main_loop(&self) -> Result<()> {
        Ok(())
    }
}

/// Serves the cached snapshot while it is fresh, otherwise fetches live.
/// Source failures are logged and yield an empty batch.
#[async_trait]
impl MarketSource for IngestSupervisor {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_active_markets(&self) -> Result<Vec<MarketRecord>> {
        if let Some(markets) = self.fresh_snapshot() {
            return Ok(markets);
        }
        match self.source.fetch_active_markets().await {
            Ok(markets) => {
                refresh(&self.cache, &markets);
                Ok(markets)
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Failed to fetch markets");
                Ok(Vec::new())
            }
        }
    }
}
