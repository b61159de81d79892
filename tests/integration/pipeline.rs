//! Scoring and sizing through the public API, fed from the bundled
//! market snapshot.

use chrono::{Duration, TimeZone, Utc};

use flywheel::data::{MarketSource, SnapshotFileSource};
use flywheel::strategy::sizer::PositionSizer;
use flywheel::strategy::scorer::MarketScorer;
use flywheel::strategy::{DecisionPipeline, DecisionRecord};
use flywheel::types::{Confidence, MarketRecord};

fn reference_market() -> MarketRecord {
    MarketRecord {
        ticker: "NFL-KC".to_string(),
        title: "Will Kansas City win?".to_string(),
        category: "sports".to_string(),
        last_price: Some(65.0),
        yes_bid: Some(64.0),
        yes_ask: Some(66.0),
        volume_24h: Some(15_000.0),
        open_interest: Some(50_000.0),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_bundled_snapshot_runs_through_pipeline() {
    let source = SnapshotFileSource::new("data/markets.json");
    let markets = source.fetch_active_markets().await.unwrap();
    // The closed weather market is filtered out at the source.
    assert_eq!(markets.len(), 2);
    assert!(markets.iter().all(|m| m.is_active()));

    let report = DecisionPipeline::default().evaluate(markets, 66.13, 0.0);
    assert_eq!(report.markets_scored, 2);
    assert_eq!(report.decisions.len(), 2);
    assert!(report.total_recommended <= 66.13 * 0.60);
}

#[test]
fn test_reference_market_scores_medium() {
    let scorer = MarketScorer::default();
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let mut market = reference_market();
    market.close_time = Some((now + Duration::days(10)).to_rfc3339());

    let score = scorer.score_at(&market, now);
    assert!((score.total - 64.76).abs() < 0.01, "total was {}", score.total);
    assert_eq!(score.confidence, Confidence::Medium);
}

#[test]
fn test_small_account_sizes_within_single_position_cap() {
    let scorer = MarketScorer::default();
    let sizer = PositionSizer::default();
    let mut market = reference_market();
    market.close_time = Some((Utc::now() + Duration::days(10)).to_rfc3339());

    let score = scorer.score(&market);
    let decision = sizer.size(&market, &score, 66.13, 0.0);
    assert!(decision.amount() <= 66.13 * 0.15);
    assert!(!decision.reason().is_empty());
}

#[test]
fn test_pass_log_accounts_for_every_market() {
    let markets: Vec<_> = (0..6)
        .map(|i| {
            let mut m = reference_market();
            m.ticker = format!("NFL-{i}");
            m.close_time = Some((Utc::now() + Duration::days(5)).to_rfc3339());
            m
        })
        .collect();

    let report = DecisionPipeline::default().evaluate(markets, 200.0, 100.0);
    assert_eq!(report.decisions.len(), 6);
    let selected = report
        .decisions
        .iter()
        .filter(|d| matches!(d, DecisionRecord::Selected { .. }))
        .count();
    assert_eq!(selected, report.opportunities.len());
    assert!(report.total_recommended <= 200.0 * 0.60 - 100.0 + 1e-9);
}
