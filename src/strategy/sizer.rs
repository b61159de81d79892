//! Kelly criterion position sizing.
//!
//! Turns a scored market into a recommended position using fractional
//! Kelly, scaled by confidence and risk, then capped by the per-position
//! limit and the remaining exposure headroom. Every refusal carries a
//! reason; sizing never fails.

use thiserror::Error;
use tracing::debug;

use crate::config::SizingConfig;
use crate::types::{Confidence, MarketRecord, ScoreBreakdown, Side};

// ---------------------------------------------------------------------------
// Gates
// ---------------------------------------------------------------------------

/// Total score below which nothing is sized.
const MIN_SCORE: f64 = 40.0;
/// Edge sub-score below which nothing is sized.
const MIN_EDGE_SCORE: f64 = 0.3;
/// Liquidity sub-score below which nothing is sized.
const MIN_LIQUIDITY_SCORE: f64 = 0.2;

/// Edge sub-score at which the implied probability equals the price.
const EDGE_PIVOT: f64 = 0.3;
/// Cents of implied mispricing per unit of edge above the pivot.
const CENTS_PER_EDGE: f64 = 20.0;

/// Risk multiplier spans [RISK_BASE, RISK_BASE + RISK_SPAN].
const RISK_BASE: f64 = 0.8;
const RISK_SPAN: f64 = 0.4;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Why a market was not sized.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("No capital available (at max exposure, headroom ${headroom:.2})")]
    AtMaxExposure { headroom: f64 },
    #[error("Score too low ({0:.1}/100)")]
    ScoreTooLow(f64),
    #[error("Insufficient edge ({0:.2})")]
    InsufficientEdge(f64),
    #[error("Poor liquidity ({0:.2})")]
    PoorLiquidity(f64),
    #[error("No positive edge detected")]
    NoPositiveEdge,
    #[error("Position too small (${amount:.2} < ${min:.2})")]
    BelowMinimum { amount: f64, min: f64 },
}

/// An accepted position recommendation.
#[derive(Debug, Clone, PartialEq)]
pub struct SizedPosition {
    pub side: Side,
    /// Final amount in whole currency units.
    pub amount: f64,
    /// Fractional-Kelly amount before confidence, risk, and caps.
    pub kelly_amount: f64,
    /// Implied probability edge on the chosen side (0–1).
    pub edge: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizingDecision {
    Accept(SizedPosition),
    Reject(Rejection),
}

impl SizingDecision {
    /// Recommended size; zero when rejected.
    pub fn amount(&self) -> f64 {
        match self {
            SizingDecision::Accept(p) => p.amount,
            SizingDecision::Reject(_) => 0.0,
        }
    }

    /// Rationale when accepted, refusal reason otherwise.
    pub fn reason(&self) -> String {
        match self {
            SizingDecision::Accept(p) => p.rationale.clone(),
            SizingDecision::Reject(r) => r.to_string(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SizingDecision::Accept(_))
    }
}

// ---------------------------------------------------------------------------
// Sizer
// ---------------------------------------------------------------------------

pub struct PositionSizer {
    config: SizingConfig,
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self::new(SizingConfig::default())
    }
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// Access the sizing configuration.
    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Remaining room under the total exposure cap.
    pub fn headroom(&self, capital: f64, exposure: f64) -> f64 {
        capital * self.config.max_total_exposure - exposure
    }

    /// Largest position this sizer will ever return for the given capital
    /// state.
    pub fn max_position(&self, capital: f64, exposure: f64) -> f64 {
        (capital * self.config.max_position_pct).min(self.headroom(capital, exposure))
    }

    /// Size a position on `market` given a fresh capital snapshot.
    pub fn size(
        &self,
        market: &MarketRecord,
        breakdown: &ScoreBreakdown,
        capital: f64,
        exposure: f64,
    ) -> SizingDecision {
        match self.try_size(market, breakdown, capital, exposure) {
            Ok(position) => SizingDecision::Accept(position),
            Err(rejection) => {
                debug!(ticker = %market.ticker, reason = %rejection, "Position rejected");
                SizingDecision::Reject(rejection)
            }
        }
    }

    fn try_size(
        &self,
        market: &MarketRecord,
        breakdown: &ScoreBreakdown,
        capital: f64,
        exposure: f64,
    ) -> Result<SizedPosition, Rejection> {
        let cfg = &self.config;

        let headroom = self.headroom(capital, exposure);
        if !(headroom >= cfg.min_bet) {
            return Err(Rejection::AtMaxExposure { headroom });
        }
        if breakdown.total < MIN_SCORE {
            return Err(Rejection::ScoreTooLow(breakdown.total));
        }
        if breakdown.edge < MIN_EDGE_SCORE {
            return Err(Rejection::InsufficientEdge(breakdown.edge));
        }
        if breakdown.liquidity < MIN_LIQUIDITY_SCORE {
            return Err(Rejection::PoorLiquidity(breakdown.liquidity));
        }

        // Implied probability: nudge the price toward our edge.
        let price = market.price();
        let true_prob = (price + (breakdown.edge - EDGE_PIVOT) * CENTS_PER_EDGE).clamp(0.0, 100.0);

        let (side, edge) = if true_prob > price {
            (Side::Yes, (true_prob - price) / 100.0)
        } else {
            let no_price = 100.0 - price;
            let true_no = 100.0 - true_prob;
            (Side::No, (true_no - no_price) / 100.0)
        };

        if edge <= 0.0 {
            return Err(Rejection::NoPositiveEdge);
        }

        let kelly_amount = capital * edge * cfg.kelly_fraction;

        let confidence_mult = self.confidence_multiplier(breakdown.confidence);
        let risk_mult = RISK_BASE + breakdown.risk.clamp(0.0, 1.0) * RISK_SPAN;
        let adjusted = kelly_amount * confidence_mult * risk_mult;

        let capped = adjusted
            .min(capital * cfg.max_position_pct)
            .min(headroom);
        let amount = (capped / cfg.granularity).floor() * cfg.granularity;

        if amount < cfg.min_bet {
            return Err(Rejection::BelowMinimum {
                amount,
                min: cfg.min_bet,
            });
        }

        let rationale = format!(
            "{side} ${amount:.0} (Kelly: ${kelly_amount:.0}, conf: {}, edge: {:.2}%)",
            breakdown.confidence,
            edge * 100.0,
        );

        debug!(
            ticker = %market.ticker,
            side = %side,
            raw_kelly = format!("${:.2}", kelly_amount),
            amount = format!("${:.2}", amount),
            "Position sized"
        );

        Ok(SizedPosition {
            side,
            amount,
            kelly_amount,
            edge,
            rationale,
        })
    }

    fn confidence_multiplier(&self, confidence: Confidence) -> f64 {
        match confidence {
            Confidence::Low => self.config.low_confidence_multiplier,
            Confidence::Medium => self.config.medium_confidence_multiplier,
            Confidence::High => self.config.high_confidence_multiplier,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn priced(price: f64) -> MarketRecord {
        MarketRecord {
            ticker: "TEST-HIGH".into(),
            last_price: Some(price),
            ..Default::default()
        }
    }

    fn breakdown(total: f64, confidence: Confidence, edge: f64, risk: f64, liquidity: f64) -> ScoreBreakdown {
        ScoreBreakdown {
            liquidity,
            edge,
            timeframe: 0.8,
            volatility: 0.5,
            risk,
            total,
            confidence,
        }
    }

    fn qualifying() -> ScoreBreakdown {
        breakdown(75.0, Confidence::High, 0.6, 0.8, 0.9)
    }

    #[test]
    fn test_reference_small_account() {
        let sizer = PositionSizer::default();
        let decision = sizer.size(&priced(45.0), &qualifying(), 66.13, 0.0);
        let amount = decision.amount();
        assert!(amount > 0.0, "{}", decision.reason());
        assert!(amount <= (66.13_f64 * 0.15).floor());
        assert_eq!(amount.fract(), 0.0);
        match decision {
            SizingDecision::Accept(p) => {
                assert_eq!(p.side, Side::Yes);
                assert!((p.edge - 0.06).abs() < 1e-9);
                assert!(p.rationale.starts_with("YES $"));
                assert!(p.rationale.contains("conf: high"));
            }
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[test]
    fn test_large_account_hits_position_cap() {
        let sizer = PositionSizer::new(SizingConfig {
            kelly_fraction: 1.0,
            ..SizingConfig::default()
        });
        let mut b = qualifying();
        b.edge = 1.0;
        let decision = sizer.size(&priced(30.0), &b, 1_000.0, 0.0);
        assert_eq!(decision.amount(), 150.0);
    }

    #[test]
    fn test_headroom_caps_size() {
        let sizer = PositionSizer::new(SizingConfig {
            kelly_fraction: 1.0,
            ..SizingConfig::default()
        });
        let mut b = qualifying();
        b.edge = 1.0;
        // 60% of 1000 = 600 cap, 560 deployed → 40 left.
        let decision = sizer.size(&priced(30.0), &b, 1_000.0, 560.0);
        assert_eq!(decision.amount(), 40.0);
        assert!(decision.amount() <= sizer.max_position(1_000.0, 560.0));
    }

    #[test]
    fn test_rejects_at_max_exposure() {
        let sizer = PositionSizer::default();
        let decision = sizer.size(&priced(45.0), &qualifying(), 100.0, 59.5);
        assert!(matches!(
            decision,
            SizingDecision::Reject(Rejection::AtMaxExposure { .. })
        ));
        assert_eq!(decision.amount(), 0.0);
    }

    #[test]
    fn test_rejects_low_score() {
        let sizer = PositionSizer::default();
        let mut b = qualifying();
        b.total = 39.9;
        let decision = sizer.size(&priced(45.0), &b, 1_000.0, 0.0);
        assert_eq!(decision, SizingDecision::Reject(Rejection::ScoreTooLow(39.9)));
        assert!(decision.reason().starts_with("Score too low"));
    }

    #[test]
    fn test_rejects_low_edge() {
        let sizer = PositionSizer::default();
        let mut b = qualifying();
        b.edge = 0.29;
        let decision = sizer.size(&priced(45.0), &b, 1_000.0, 0.0);
        assert_eq!(decision, SizingDecision::Reject(Rejection::InsufficientEdge(0.29)));
    }

    #[test]
    fn test_rejects_poor_liquidity() {
        let sizer = PositionSizer::default();
        let mut b = qualifying();
        b.liquidity = 0.19;
        let decision = sizer.size(&priced(45.0), &b, 1_000.0, 0.0);
        assert_eq!(decision, SizingDecision::Reject(Rejection::PoorLiquidity(0.19)));
    }

    #[test]
    fn test_pivot_edge_has_no_direction() {
        let sizer = PositionSizer::default();
        let mut b = qualifying();
        b.edge = 0.3;
        let decision = sizer.size(&priced(45.0), &b, 1_000.0, 0.0);
        assert_eq!(decision, SizingDecision::Reject(Rejection::NoPositiveEdge));
    }

    #[test]
    fn test_price_ceiling_has_no_edge() {
        let sizer = PositionSizer::default();
        let decision = sizer.size(&priced(100.0), &qualifying(), 1_000.0, 0.0);
        assert_eq!(decision, SizingDecision::Reject(Rejection::NoPositiveEdge));
    }

    #[test]
    fn test_rejects_below_minimum() {
        let sizer = PositionSizer::new(SizingConfig {
            min_bet: 2.0,
            ..SizingConfig::default()
        });
        let decision = sizer.size(&priced(45.0), &qualifying(), 66.13, 0.0);
        assert!(matches!(
            decision,
            SizingDecision::Reject(Rejection::BelowMinimum { .. })
        ));
    }

    #[test]
    fn test_confidence_scales_size() {
        let sizer = PositionSizer::new(SizingConfig {
            max_position_pct: 1.0,
            max_total_exposure: 1.0,
            ..SizingConfig::default()
        });
        let market = priced(40.0);
        let sized = |c| {
            let mut b = qualifying();
            b.confidence = c;
            sizer.size(&market, &b, 10_000.0, 0.0).amount()
        };
        let (low, medium, high) = (sized(Confidence::Low), sized(Confidence::Medium), sized(Confidence::High));
        assert!(low < medium && medium < high, "{low} {medium} {high}");
    }

    #[test]
    fn test_granularity_floors_amount() {
        let sizer = PositionSizer::new(SizingConfig {
            granularity: 5.0,
            ..SizingConfig::default()
        });
        let amount = sizer.size(&priced(45.0), &qualifying(), 1_000.0, 0.0).amount();
        assert_eq!(amount % 5.0, 0.0);
        assert!(amount > 0.0);
    }

    #[test]
    fn test_never_exceeds_caps() {
        let sizer = PositionSizer::new(SizingConfig {
            kelly_fraction: 1.0,
            ..SizingConfig::default()
        });
        for capital in [10.0, 66.13, 250.0, 5_000.0] {
            for exposure_pct in [0.0, 0.2, 0.45, 0.59] {
                for price in [5.0, 30.0, 45.0, 70.0, 95.0] {
                    for edge in [0.31, 0.5, 0.8, 1.0] {
                        let exposure = capital * exposure_pct;
                        let mut b = qualifying();
                        b.edge = edge;
                        let amount = sizer.size(&priced(price), &b, capital, exposure).amount();
                        assert!(amount <= sizer.max_position(capital, exposure) + 1e-9);
                        assert!(amount >= 0.0);
                    }
                }
            }
        }
    }
}
