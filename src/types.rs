//! Shared types for the FLYWHEEL runtime.
//!
//! These types form the data model passed between the ingest, scoring,
//! sizing, and storage stages. Market records are read-only inputs;
//! breakdowns are recomputed every pass; opportunities are the only
//! values that get persisted.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Market record
// ---------------------------------------------------------------------------

/// Price assumed when a record carries no last trade, in cents.
const DEFAULT_PRICE_CENTS: f64 = 50.0;

/// Ask assumed when a record carries no ask, in cents.
const DEFAULT_ASK_CENTS: f64 = 100.0;

/// A market snapshot as delivered by the market data source.
///
/// Every numeric field is optional; the accessors below supply the
/// documented defaults so that scoring never fails on a sparse record.
/// Unknown fields are preserved in `extra` and round-trip untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: String,
    /// Venue status ("active", "open", "closed", ...), if reported.
    #[serde(default)]
    pub status: Option<String>,
    /// Last traded YES price in cents (0–100).
    pub last_price: Option<f64>,
    pub yes_bid: Option<f64>,
    pub yes_ask: Option<f64>,
    pub volume_24h: Option<f64>,
    pub open_interest: Option<f64>,
    /// Close timestamp, RFC 3339 or naive ISO 8601 (treated as UTC).
    pub close_time: Option<String>,
    /// Present on capped / structured-strike markets; absent on plain binaries.
    pub cap_strike: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn finite_or(value: Option<f64>, default: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => default,
    }
}

impl MarketRecord {
    /// Stable identifier: the venue id when present, otherwise the ticker.
    pub fn market_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.ticker)
    }

    /// Last YES price in cents, clamped to [0, 100].
    pub fn price(&self) -> f64 {
        finite_or(self.last_price, DEFAULT_PRICE_CENTS).clamp(0.0, 100.0)
    }

    pub fn bid(&self) -> f64 {
        finite_or(self.yes_bid, 0.0)
    }

    pub fn ask(&self) -> f64 {
        finite_or(self.yes_ask, DEFAULT_ASK_CENTS)
    }

    /// Ask minus bid, in cents.
    pub fn spread(&self) -> f64 {
        self.ask() - self.bid()
    }

    pub fn volume(&self) -> f64 {
        finite_or(self.volume_24h, 0.0).max(0.0)
    }

    pub fn open_interest(&self) -> f64 {
        finite_or(self.open_interest, 0.0).max(0.0)
    }

    /// Plain YES/NO market with no capped strike structure.
    pub fn is_binary(&self) -> bool {
        self.cap_strike.is_none()
    }

    /// Whether the venue reports this market as tradeable (or says nothing).
    pub fn is_active(&self) -> bool {
        match self.status.as_deref() {
            None => true,
            Some(s) => matches!(s.to_ascii_lowercase().as_str(), "active" | "open"),
        }
    }

    /// Parsed close time. `None` when missing or unparseable.
    pub fn close_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.close_time.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }

    /// Helper to build a liquid sample market for tests.
    #[cfg(test)]
    pub fn sample() -> Self {
        MarketRecord {
            id: Some("NFL-SUPERBOWL-KC".to_string()),
            ticker: "NFL-SUPERBOWL-KC".to_string(),
            title: "Will Kansas City win the Super Bowl?".to_string(),
            category: "sports".to_string(),
            status: Some("active".to_string()),
            last_price: Some(65.0),
            yes_bid: Some(64.0),
            yes_ask: Some(66.0),
            volume_24h: Some(15_000.0),
            open_interest: Some(50_000.0),
            close_time: Some((Utc::now() + chrono::Duration::days(10)).to_rfc3339()),
            cap_strike: None,
            extra: Default::default(),
        }
    }
}

impl fmt::Display for MarketRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (YES: {:.0}¢ | bid/ask {:.0}/{:.0} | vol: {:.0} | OI: {:.0})",
            self.ticker,
            self.title,
            self.price(),
            self.bid(),
            self.ask(),
            self.volume(),
            self.open_interest(),
        )
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Bet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Yes => write!(f, "YES"),
            Side::No => write!(f, "NO"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "YES" => Ok(Side::Yes),
            "NO" => Ok(Side::No),
            _ => Err(anyhow::anyhow!("Unknown side: {s}")),
        }
    }
}

/// Categorical confidence attached to every score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Confidence {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Confidence::Low),
            "medium" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            _ => Err(anyhow::anyhow!("Unknown confidence level: {s}")),
        }
    }
}

/// Lifecycle of a persisted opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityStatus {
    Active,
    Executed,
}

impl OpportunityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityStatus::Active => "active",
            OpportunityStatus::Executed => "executed",
        }
    }
}

impl std::str::FromStr for OpportunityStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(OpportunityStatus::Active),
            "executed" => Ok(OpportunityStatus::Executed),
            _ => Err(anyhow::anyhow!("Unknown opportunity status: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring output
// ---------------------------------------------------------------------------

/// Per-factor scores for one market, each normalised to [0, 1], plus the
/// weighted total in [0, 100] and the confidence label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub liquidity: f64,
    pub edge: f64,
    pub timeframe: f64,
    pub volatility: f64,
    pub risk: f64,
    pub total: f64,
    pub confidence: Confidence,
}

impl ScoreBreakdown {
    /// The five factors in canonical order.
    pub fn factors(&self) -> [(&'static str, f64); 5] {
        [
            ("liquidity", self.liquidity),
            ("edge", self.edge),
            ("timeframe", self.timeframe),
            ("volatility", self.volatility),
            ("risk", self.risk),
        ]
    }
}

impl fmt::Display for ScoreBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "score={:.1}/100 ({}) liq={:.2} edge={:.2} time={:.2} vol={:.2} risk={:.2}",
            self.total,
            self.confidence,
            self.liquidity,
            self.edge,
            self.timeframe,
            self.volatility,
            self.risk,
        )
    }
}

// ---------------------------------------------------------------------------
// Opportunity
// ---------------------------------------------------------------------------

/// A scored, sized candidate trade.
///
/// Created by the decision pipeline, persisted by the storage collaborator,
/// and only ever mutated by the `active → executed` transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    /// Storage row id; `None` until persisted.
    pub id: Option<i64>,
    pub market: MarketRecord,
    pub breakdown: ScoreBreakdown,
    pub side: Side,
    /// Recommended position in whole currency units.
    pub position_size: f64,
    pub rationale: String,
    pub status: OpportunityStatus,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl Opportunity {
    pub fn new(
        market: MarketRecord,
        breakdown: ScoreBreakdown,
        side: Side,
        position_size: f64,
        rationale: String,
    ) -> Self {
        Self {
            id: None,
            market,
            breakdown,
            side,
            position_size,
            rationale,
            status: OpportunityStatus::Active,
            created_at: Utc::now(),
            executed_at: None,
        }
    }

    pub fn score(&self) -> f64 {
        self.breakdown.total
    }

    pub fn confidence(&self) -> Confidence {
        self.breakdown.confidence
    }
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} | {:.1}/100 ({})",
            self.market.title,
            self.rationale,
            self.score(),
            self.confidence(),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
