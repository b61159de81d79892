//! Strategy engine: market scoring, Kelly sizing, and the decision
//! pipeline that ties them together.

pub mod scorer;
pub mod sizer;

use anyhow::Result;
use tracing::{debug, info};

use crate::config::{ScoringConfig, SizingConfig};
use crate::types::{MarketRecord, Opportunity};
use scorer::MarketScorer;
use sizer::{PositionSizer, Rejection, SizingDecision};

// ---------------------------------------------------------------------------
// Decision log
// ---------------------------------------------------------------------------

/// Record of every decision made (or skipped) during a pipeline pass,
/// including the markets that were passed on and why.
#[derive(Debug, Clone)]
pub enum DecisionRecord {
    /// Sized and turned into an opportunity.
    Selected { ticker: String, amount: f64 },
    /// Scored below the floor at which sizing is attempted.
    BelowScoreFloor { ticker: String, score: f64 },
    /// Sizing declined.
    Rejected { ticker: String, reason: Rejection },
}

/// Outcome of one pass over a batch of market records.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub markets_scored: usize,
    /// Best-first.
    pub opportunities: Vec<Opportunity>,
    pub decisions: Vec<DecisionRecord>,
    /// Sum of the recommended sizes in this pass.
    pub total_recommended: f64,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Pipelines ranking → score floor → sizing → opportunity construction.
///
/// The capital snapshot is supplied per pass. Sizes recommended earlier in
/// a pass count as exposure for later records in the same pass, so one
/// pass can never recommend more than the headroom it started with.
pub struct DecisionPipeline {
    scorer: MarketScorer,
    sizer: PositionSizer,
}

impl DecisionPipeline {
    pub fn new(scorer: MarketScorer, sizer: PositionSizer) -> Self {
        Self { scorer, sizer }
    }

    pub fn from_config(scoring: ScoringConfig, sizing: SizingConfig) -> Result<Self> {
        Ok(Self::new(MarketScorer::new(scoring)?, PositionSizer::new(sizing)))
    }

    pub fn scorer(&self) -> &MarketScorer {
        &self.scorer
    }

    pub fn sizer(&self) -> &PositionSizer {
        &self.sizer
    }

    /// Score, rank, and size a batch of records against one capital snapshot.
    pub fn evaluate(&self, markets: Vec<MarketRecord>, capital: f64, exposure: f64) -> PassReport {
        let mut report = PassReport {
            markets_scored: markets.len(),
            ..PassReport::default()
        };
        let floor = self.sizer.config().min_score_to_size;
        let mut running_exposure = exposure;

        for (market, breakdown) in self.scorer.rank_markets(markets) {
            if breakdown.total < floor {
                report.decisions.push(DecisionRecord::BelowScoreFloor {
                    ticker: market.ticker.clone(),
                    score: breakdown.total,
                });
                continue;
            }

            match self.sizer.size(&market, &breakdown, capital, running_exposure) {
                SizingDecision::Accept(position) => {
                    running_exposure += position.amount;
                    report.total_recommended += position.amount;
                    report.decisions.push(DecisionRecord::Selected {
                        ticker: market.ticker.clone(),
                        amount: position.amount,
                    });
                    report.opportunities.push(Opportunity::new(
                        market,
                        breakdown,
                        position.side,
                        position.amount,
                        position.rationale,
                    ));
                }
                SizingDecision::Reject(reason) => {
                    debug!(ticker = %market.ticker, %reason, "Market passed on");
                    report.decisions.push(DecisionRecord::Rejected {
                        ticker: market.ticker.clone(),
                        reason,
                    });
                }
            }
        }

        info!(
            scored = report.markets_scored,
            selected = report.opportunities.len(),
            recommended = format!("${:.2}", report.total_recommended),
            "Decision pass complete"
        );

        report
    }
}

impl Default for DecisionPipeline {
    fn default() -> Self {
        Self::new(MarketScorer::default(), PositionSizer::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
