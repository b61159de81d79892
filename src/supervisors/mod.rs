//! Concrete supervisors and the wiring between them.
//!
//! Dependency order is `Repo → Ingest → Capital → Markets`: each supervisor
//! only calls the public operations of those registered before it, so
//! start order satisfies every dependency and reverse-order shutdown
//! stops consumers before their providers.

pub mod capital;
pub mod ingest;
pub mod markets;
pub mod repo;

use anyhow::Result;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::data::{MarketSource, SnapshotFileSource};
use crate::engine::orchestrator::Orchestrator;
use crate::engine::supervisor::{LoopTiming, Supervisor};

pub use capital::CapitalSupervisor;
pub use ingest::IngestSupervisor;
pub use markets::{MarketsDeps, MarketsSupervisor};
pub use repo::{RepoSupervisor, StoreLocation};

/// Handles to the concrete supervisors, for callers that want their
/// public operations directly.
pub struct Assembly {
    pub orchestrator: Orchestrator,
    pub repo: Arc<RepoSupervisor>,
    pub ingest: Arc<IngestSupervisor>,
    pub capital: Arc<CapitalSupervisor>,
    pub markets: Arc<MarketsSupervisor>,
}

/// Build all supervisors from config, reading markets from the snapshot file.
pub fn assemble(config: &AppConfig) -> Result<Assembly> {
    let source = Arc::new(SnapshotFileSource::new(&config.data.markets_file));
    assemble_with_source(config, source)
}

/// Build all supervisors around the given market source.
pub fn assemble_with_source(config: &AppConfig, source: Arc<dyn MarketSource>) -> Result<Assembly> {
    let timing = LoopTiming::from(&config.runtime);
    let cadences = &config.workers;

    let repo = Arc::new(RepoSupervisor::new(
        StoreLocation::from(&config.storage),
        cadences.database(),
    ));
    let ingest = Arc::new(IngestSupervisor::new(
        source,
        config.data.snapshot_max_age(),
        cadences.ingest(),
    ));
    let capital = Arc::new(CapitalSupervisor::new(
        &config.capital,
        &config.sizing,
        cadences.portfolio(),
    )?);
    let markets = Arc::new(MarketsSupervisor::new(
        MarketsDeps {
            store: repo.clone(),
            source: ingest.clone(),
            capital: capital.clone(),
        },
        config.scoring.clone(),
        config.sizing.clone(),
        cadences,
    )?);

    let mut orchestrator = Orchestrator::new(config.runtime.clone());
    orchestrator.register(Arc::new(Supervisor::from_arc(repo.clone(), timing)))?;
    orchestrator.register(Arc::new(Supervisor::from_arc(ingest.clone(), timing)))?;
    orchestrator.register(Arc::new(Supervisor::from_arc(capital.clone(), timing)))?;
    orchestrator.register(Arc::new(Supervisor::from_arc(markets.clone(), timing)))?;

    Ok(Assembly {
        orchestrator,
        repo,
        ingest,
        capital,
        markets,
    })
}
