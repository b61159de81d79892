//! Markets supervisor: turns market snapshots into stored opportunities.
//!
//! Each analysis pass reads capital once, pulls active markets from the
//! ingest layer, runs them through the decision pipeline, and persists
//! whatever gets sized. A failed pass is retried on the next cadence.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::config::{ScoringConfig, SizingConfig, WorkerCadences};
use crate::data::MarketSource;
use crate::engine::accountant::CapitalSource;
use crate::engine::supervisor::Supervisable;
use crate::engine::worker::{Worker, WorkerTask};
use crate::storage::OpportunityStore;
use crate::strategy::{DecisionPipeline, PassReport};
use crate::types::Opportunity;

pub const NAME: &str = "Markets";

/// Opportunities the monitor looks at per sweep.
const MONITOR_LIMIT: usize = 10;

/// Everything an analysis pass talks to.
#[derive(Clone)]
pub struct MarketsDeps {
    pub store: Arc<dyn OpportunityStore>,
    pub source: Arc<dyn MarketSource>,
    pub capital: Arc<dyn CapitalSource>,
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

pub struct MarketAnalysisWorker {
    deps: MarketsDeps,
    pipeline: Arc<DecisionPipeline>,
}

impl MarketAnalysisWorker {
    pub fn new(deps: MarketsDeps, pipeline: Arc<DecisionPipeline>) -> Self {
        Self { deps, pipeline }
    }

    /// One full pass. Returns the pipeline report, or `None` when there
    /// was nothing to analyse.
    pub async fn analyse(&self) -> Result<Option<PassReport>> {
        let capital = self.deps.capital.snapshot().await?;
        let markets = self.deps.source.fetch_active_markets().await?;
        if markets.is_empty() {
            debug!("No active markets to analyse");
            return Ok(None);
        }

        let mut report =
            self.pipeline
                .evaluate(markets, capital.balance_f64(), capital.exposure_f64());
        if report.opportunities.is_empty() {
            return Ok(Some(report));
        }

        for opp in report.opportunities.iter().take(3) {
            info!(ticker = %opp.market.ticker, rationale = %opp.rationale, "Opportunity");
        }
        let opportunities = std::mem::take(&mut report.opportunities);
        let ids = self.deps.store.store_opportunities(opportunities.clone()).await?;
        report.opportunities = opportunities
            .into_iter()
            .zip(ids)
            .map(|(mut opp, id)| {
                opp.id = Some(id);
                opp
            })
            .collect();
        info!(count = report.opportunities.len(), "Stored trading opportunities");

        Ok(Some(report))
    }
}

#[async_trait]
impl WorkerTask for MarketAnalysisWorker {
    fn name(&self) -> &str {
        "MarketAnalysisWorker"
    }

    async fn run_once(&self) -> Result<()> {
        let span = tracing::info_span!("analysis_pass", pass_id = %Uuid::new_v4());
        self.analyse().instrument(span).await.map(|_| ())
    }
}

/// Watches the active opportunity set.
pub struct OpportunityMonitor {
    store: Arc<dyn OpportunityStore>,
}

#[async_trait]
impl WorkerTask for OpportunityMonitor {
    fn name(&self) -> &str {
        "OpportunityMonitor"
    }

    async fn run_once(&self) -> Result<()> {
        let active = self.store.get_active_opportunities(MONITOR_LIMIT).await?;
        match active.first() {
            Some(best) => debug!(active = active.len(), best = %best, "Active opportunities"),
            None => debug!("No active opportunities"),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct MarketsSupervisor {
    deps: MarketsDeps,
    pipeline: Arc<DecisionPipeline>,
    analysis_cadence: Duration,
    monitor_cadence: Duration,
}

impl MarketsSupervisor {
    pub fn new(
        deps: MarketsDeps,
        scoring: ScoringConfig,
        sizing: SizingConfig,
        cadences: &WorkerCadences,
    ) -> Result<Self> {
        Ok(Self {
            deps,
            pipeline: Arc::new(DecisionPipeline::from_config(scoring, sizing)?),
            analysis_cadence: cadences.market_analysis(),
            monitor_cadence: cadences.opportunity_monitor(),
        })
    }

    /// Best active opportunities, highest score first.
    pub async fn top_opportunities(&self, limit: usize) -> Result<Vec<Opportunity>> {
        self.deps.store.get_active_opportunities(limit).await
    }
}

#[async_trait]
impl Supervisable for MarketsSupervisor {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&self) -> Result<Vec<Worker>> {
        let analysis = MarketAnalysisWorker::new(self.deps.clone(), Arc::clone(&self.pipeline));
        let monitor = OpportunityMonitor {
            store: Arc::clone(&self.deps.store),
        };
        Ok(vec![
            Worker::new(analysis, self.analysis_cadence),
            Worker::new(monitor, self.monitor_cadence),
        ])
    }

    async fn main_loop(&self) -> Result<()> {
        Ok(())
    }
}
