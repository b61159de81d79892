//! Multi-factor market scoring.
//!
//! Scores a market record on five independent factors (liquidity, edge,
//! timeframe, volatility, risk), each normalised to [0, 1], and combines
//! them with a fixed weight table into a 0–100 total plus a confidence
//! label. Pure: the only inputs are the record, the clock, and the
//! configured weights.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::config::{EdgeKeyword, ScoringConfig};
use crate::types::{Confidence, MarketRecord, ScoreBreakdown};

// ---------------------------------------------------------------------------
// Factor constants
// ---------------------------------------------------------------------------

/// 24h volume at which the volume component saturates.
const VOLUME_SATURATION: f64 = 5_000.0;
/// Spread (cents) at which the spread component reaches zero.
const SPREAD_ZERO_AT: f64 = 10.0;
/// Open interest at which the OI component saturates.
const OPEN_INTEREST_SATURATION: f64 = 10_000.0;

/// Prices beyond these bounds (cents) earn a contrarian edge bonus.
const CONTRARIAN_LOW: f64 = 20.0;
const CONTRARIAN_HIGH: f64 = 80.0;
const CONTRARIAN_MAX_BONUS: f64 = 0.3;

/// Timeframe score used when the close time is missing or unparseable.
const TIMEFRAME_FALLBACK: f64 = 0.3;

/// Volume above which the volatility factor gets a 1.2x boost.
const VOLATILITY_BOOST_VOLUME: f64 = 2_000.0;
const VOLATILITY_BOOST: f64 = 1.2;

/// Bonus for plain binary markets in the risk factor.
const BINARY_BONUS: f64 = 0.3;

/// Tolerance for the weight-sum invariant (binary floating point).
const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

/// Factor weights. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub liquidity: f64,
    pub edge: f64,
    pub timeframe: f64,
    pub volatility: f64,
    pub risk: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            liquidity: 0.25,
            edge: 0.35,
            timeframe: 0.20,
            volatility: 0.10,
            risk: 0.10,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.liquidity + self.edge + self.timeframe + self.volatility + self.risk
    }

    /// Reject tables with a negative weight or a sum other than 1.0.
    pub fn validate(&self) -> Result<()> {
        let all = [
            self.liquidity,
            self.edge,
            self.timeframe,
            self.volatility,
            self.risk,
        ];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            bail!("scoring weights must be finite and non-negative: {self:?}");
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            bail!("scoring weights must sum to 1.0, got sum {sum}");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

pub struct MarketScorer {
    weights: ScoringWeights,
    edge_keywords: Vec<EdgeKeyword>,
    default_edge: f64,
}

impl Default for MarketScorer {
    fn default() -> Self {
        let config = ScoringConfig::default();
        Self {
            weights: config.weights,
            edge_keywords: config.edge_keywords,
            default_edge: config.default_edge,
        }
    }
}

impl MarketScorer {
    /// Build a scorer, enforcing the weight-sum invariant.
    pub fn new(config: ScoringConfig) -> Result<Self> {
        config.weights.validate()?;
        let edge_keywords = config
            .edge_keywords
            .into_iter()
            .map(|k| EdgeKeyword {
                keyword: k.keyword.to_lowercase(),
                edge: k.edge,
            })
            .collect();
        Ok(Self {
            weights: config.weights,
            edge_keywords,
            default_edge: config.default_edge,
        })
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Score a market against the current wall clock.
    pub fn score(&self, market: &MarketRecord) -> ScoreBreakdown {
        self.score_at(market, Utc::now())
    }

    /// Score a market as of `now`.
    pub fn score_at(&self, market: &MarketRecord, now: DateTime<Utc>) -> ScoreBreakdown {
        let liquidity = self.liquidity(market);
        let edge = self.edge(market);
        let timeframe = self.timeframe(market, now);
        let volatility = self.volatility(market);
        let risk = self.risk(market);

        let w = &self.weights;
        let total = (liquidity * w.liquidity
            + edge * w.edge
            + timeframe * w.timeframe
            + volatility * w.volatility
            + risk * w.risk)
            * 100.0;

        let breakdown = ScoreBreakdown {
            liquidity,
            edge,
            timeframe,
            volatility,
            risk,
            total: total.clamp(0.0, 100.0),
            confidence: confidence_for(liquidity, edge),
        };

        debug!(ticker = %market.ticker, %breakdown, "Market scored");
        breakdown
    }

    /// Score every market and sort best-first. Tie order is unspecified.
    pub fn rank_markets(&self, markets: Vec<MarketRecord>) -> Vec<(MarketRecord, ScoreBreakdown)> {
        let now = Utc::now();
        let mut scored: Vec<_> = markets
            .into_iter()
            .map(|m| {
                let breakdown = self.score_at(&m, now);
                (m, breakdown)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total.total_cmp(&a.1.total));
        scored
    }

    // -- Factors -------------------------------------------------------------

    /// Volume (0.5) + spread tightness (0.3) + open interest (0.2).
    pub fn liquidity(&self, market: &MarketRecord) -> f64 {
        let volume_score = (market.volume() / VOLUME_SATURATION).min(1.0);
        let oi_score = (market.open_interest() / OPEN_INTEREST_SATURATION).min(1.0);

        let spread = market.spread();
        // Zero spread means nobody is quoting.
        let spread_score = if spread == 0.0 {
            0.0
        } else {
            (1.0 - spread / SPREAD_ZERO_AT).clamp(0.0, 1.0)
        };

        (volume_score * 0.5 + spread_score * 0.3 + oi_score * 0.2).clamp(0.0, 1.0)
    }

    /// Category edge from the keyword table plus a contrarian bonus at
    /// extreme prices.
    pub fn edge(&self, market: &MarketRecord) -> f64 {
        let category = market.category.to_lowercase();
        let ticker = market.ticker.to_lowercase();

        let base_edge = self
            .edge_keywords
            .iter()
            .find(|k| category.contains(&k.keyword) || ticker.contains(&k.keyword))
            .map(|k| k.edge)
            .unwrap_or(self.default_edge);

        let price = market.price();
        let price_edge = if price < CONTRARIAN_LOW {
            (CONTRARIAN_LOW - price) / 20.0 * CONTRARIAN_MAX_BONUS
        } else if price > CONTRARIAN_HIGH {
            (price - CONTRARIAN_HIGH) / 20.0 * CONTRARIAN_MAX_BONUS
        } else {
            0.0
        };

        (base_edge + price_edge).clamp(0.0, 1.0)
    }

    /// Step function of whole days until close, peaking in [14, 30).
    pub fn timeframe(&self, market: &MarketRecord, now: DateTime<Utc>) -> f64 {
        let Some(close) = market.close_at() else {
            return TIMEFRAME_FALLBACK;
        };
        timeframe_for_days((close - now).num_days())
    }

    /// Peaks at 50¢, zero at the extremes; boosted on heavy volume.
    pub fn volatility(&self, market: &MarketRecord) -> f64 {
        let distance_from_mid = (market.price() - 50.0).abs();
        let mut volatility = 1.0 - distance_from_mid / 50.0;
        if market.volume() > VOLATILITY_BOOST_VOLUME {
            volatility *= VOLATILITY_BOOST;
        }
        volatility.clamp(0.0, 1.0)
    }

    /// Price-defined downside (0.4) + liquidity (0.4) + binary bonus (0.2).
    pub fn risk(&self, market: &MarketRecord) -> f64 {
        let price = market.price();
        let price_risk = if price < 30.0 {
            1.0 - price / 30.0
        } else if price > 70.0 {
            1.0 - (100.0 - price) / 30.0
        } else {
            0.5
        };

        let binary_bonus = if market.is_binary() { BINARY_BONUS } else { 0.0 };

        (price_risk * 0.4 + self.liquidity(market) * 0.4 + binary_bonus * 0.2).clamp(0.0, 1.0)
    }
}

/// Timeframe score for a whole number of days left.
pub fn timeframe_for_days(days_left: i64) -> f64 {
    match days_left {
        d if d < 3 => 0.2,
        d if d < 7 => 0.5,
        d if d < 14 => 0.8,
        d if d < 30 => 1.0,
        d if d < 60 => 0.7,
        d if d < 90 => 0.5,
        _ => 0.3,
    }
}

/// High needs liquid and clear edge; low is either thin or edgeless.
pub fn confidence_for(liquidity: f64, edge: f64) -> Confidence {
    if liquidity > 0.6 && edge > 0.5 {
        Confidence::High
    } else if liquidity < 0.3 || edge < 0.3 {
        Confidence::Low
    } else {
        Confidence::Medium
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
