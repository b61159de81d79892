//! End-to-end runtime tests: the real supervisors wired together around an
//! in-memory store and a fixed market source.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flywheel::config::AppConfig;
use flywheel::data::MarketSource;
use flywheel::engine::orchestrator::Orchestrator;
use flywheel::engine::supervisor::{LoopTiming, Supervisable, Supervisor};
use flywheel::engine::worker::Worker;
use flywheel::engine::{SupervisorError, SupervisorState};
use flywheel::storage::OpportunityStore;
use flywheel::supervisors::assemble_with_source;
use flywheel::types::MarketRecord;

struct FixedSource {
    markets: Vec<MarketRecord>,
    calls: AtomicU32,
}

#[async_trait]
impl MarketSource for FixedSource {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fetch_active_markets(&self) -> Result<Vec<MarketRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.markets.clone())
    }
}

fn economics_market(ticker: &str) -> MarketRecord {
    MarketRecord {
        id: Some(ticker.to_string()),
        ticker: ticker.to_string(),
        title: format!("Will {ticker} print above consensus?"),
        category: "economics".to_string(),
        status: Some("active".to_string()),
        last_price: Some(42.0),
        yes_bid: Some(41.0),
        yes_ask: Some(43.0),
        volume_24h: Some(12_000.0),
        open_interest: Some(20_000.0),
        close_time: Some((Utc::now() + ChronoDuration::days(20)).to_rfc3339()),
        ..Default::default()
    }
}

fn test_config() -> AppConfig {
    AppConfig::from_toml(
        r#"
        [storage]
        path = ":memory:"

        [capital]
        initial_balance = 1000.0
        "#,
    )
    .unwrap()
}

#[tokio::test]
async fn test_runtime_produces_and_serves_opportunities() {
    let source = Arc::new(FixedSource {
        markets: vec![economics_market("ECON-CPI"), economics_market("ECON-GDP")],
        calls: AtomicU32::new(0),
    });
    let assembly = assemble_with_source(&test_config(), source.clone()).unwrap();
    let orch = &assembly.orchestrator;
    assert_eq!(orch.names(), vec!["Repo", "Ingest", "Capital", "Markets"]);

    orch.start_all().await.unwrap();

    // The first analysis pass runs as soon as the workers start.
    let mut top = Vec::new();
    for _ in 0..100 {
        top = assembly.markets.top_opportunities(10).await.unwrap();
        if top.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(top.len(), 2);
    assert!(top[0].score() >= top[1].score());
    assert!(top.iter().all(|o| o.position_size >= 1.0 && o.id.is_some()));

    // Executing one removes it from the active set.
    let id = top[0].id.unwrap();
    assembly.repo.mark_executed(id).await.unwrap();
    assert_eq!(assembly.markets.top_opportunities(10).await.unwrap().len(), 1);

    let status = orch.status();
    assert!(status.iter().all(|s| s.state == SupervisorState::Running));
    assert!(status.iter().all(|s| s.healthy));
    assert_eq!(status.iter().map(|s| s.workers).sum::<usize>(), 5);
    assert!(source.calls.load(Ordering::SeqCst) >= 1);

    orch.stop_all().await;
    assert!(orch
        .status()
        .iter()
        .all(|s| s.state == SupervisorState::Stopped && s.workers == 0));
    assert!(assembly.repo.ping().await.is_err());
}

/// Panics on every main-loop iteration.
struct AlwaysCrashes;

#[async_trait]
impl Supervisable for AlwaysCrashes {
    fn name(&self) -> &str {
        "AlwaysCrashes"
    }

    async fn initialize(&self) -> Result<Vec<Worker>> {
        Ok(Vec::new())
    }

    async fn main_loop(&self) -> Result<()> {
        panic!("invariant violated");
    }
}

/// Never crashes; main loop is a no-op.
struct Steady;

#[async_trait]
impl Supervisable for Steady {
    fn name(&self) -> &str {
        "Steady"
    }

    async fn initialize(&self) -> Result<Vec<Worker>> {
        Ok(Vec::new())
    }

    async fn main_loop(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_supervisor_is_reported_and_others_stop_cleanly() {
    let config = AppConfig::default();
    let timing = LoopTiming::from(&config.runtime);
    let mut orch = Orchestrator::new(config.runtime.clone());
    orch.register(Arc::new(Supervisor::new(Steady, timing))).unwrap();
    orch.register(Arc::new(Supervisor::new(AlwaysCrashes, timing))).unwrap();

    orch.start_all().await.unwrap();
    let failure = orch.next_failure().await.expect("failure channel open");
    assert!(failure.is_fatal());
    assert!(matches!(
        failure,
        SupervisorError::RestartsExhausted { ref name, crashes: 3, .. } if name == "AlwaysCrashes"
    ));

    orch.stop_all().await;
    assert_eq!(orch.state_of("AlwaysCrashes"), Some(SupervisorState::Failed));
    assert_eq!(orch.state_of("Steady"), Some(SupervisorState::Stopped));
    assert!(orch.any_failed());
}
