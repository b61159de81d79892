//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section is optional; missing values fall back to the defaults
//! below. Supervisors receive the sections they need at construction time
//! and never read files or environment variables themselves.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::strategy::scorer::ScoringWeights;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub runtime: RuntimeConfig,
    pub workers: WorkerCadences,
    pub scoring: ScoringConfig,
    pub sizing: SizingConfig,
    pub capital: CapitalConfig,
    pub storage: StorageConfig,
    pub data: DataConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub currency: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "FLYWHEEL-001".to_string(),
            currency: "USD".to_string(),
        }
    }
}

/// Supervision timings and the two retry tiers.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Sleep between successful `main_loop` invocations.
    pub tick_ms: u64,
    /// Cool-down after a failed `main_loop` (unbounded retries).
    pub main_loop_cooldown_secs: u64,
    /// Crashes tolerated per supervisor; the last one is fatal.
    pub max_restarts: u32,
    /// Wait between a crash and the restart.
    pub restart_backoff_secs: u64,
    /// Period of the cross-supervisor health sweep.
    pub health_interval_secs: u64,
    /// Heartbeat age after which a worker counts as stale.
    pub heartbeat_stale_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            main_loop_cooldown_secs: 5,
            max_restarts: 3,
            restart_backoff_secs: 5,
            health_interval_secs: 60,
            heartbeat_stale_secs: 300,
        }
    }
}

impl RuntimeConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn main_loop_cooldown(&self) -> Duration {
        Duration::from_secs(self.main_loop_cooldown_secs)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_secs(self.restart_backoff_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn heartbeat_stale_after(&self) -> Duration {
        Duration::from_secs(self.heartbeat_stale_secs)
    }
}

/// Per-worker polling cadences, in seconds.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkerCadences {
    pub database_secs: u64,
    pub ingest_secs: u64,
    pub portfolio_secs: u64,
    pub market_analysis_secs: u64,
    pub opportunity_monitor_secs: u64,
}

impl Default for WorkerCadences {
    fn default() -> Self {
        Self {
            database_secs: 10,
            ingest_secs: 60,
            portfolio_secs: 30,
            market_analysis_secs: 60,
            opportunity_monitor_secs: 10,
        }
    }
}

impl WorkerCadences {
    pub fn database(&self) -> Duration {
        Duration::from_secs(self.database_secs)
    }

    pub fn ingest(&self) -> Duration {
        Duration::from_secs(self.ingest_secs)
    }

    pub fn portfolio(&self) -> Duration {
        Duration::from_secs(self.portfolio_secs)
    }

    pub fn market_analysis(&self) -> Duration {
        Duration::from_secs(self.market_analysis_secs)
    }

    pub fn opportunity_monitor(&self) -> Duration {
        Duration::from_secs(self.opportunity_monitor_secs)
    }

    fn all(&self) -> [(&'static str, u64); 5] {
        [
            ("database_secs", self.database_secs),
            ("ingest_secs", self.ingest_secs),
            ("portfolio_secs", self.portfolio_secs),
            ("market_analysis_secs", self.market_analysis_secs),
            ("opportunity_monitor_secs", self.opportunity_monitor_secs),
        ]
    }
}

/// One keyword → base-edge entry. Order matters: first match wins.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EdgeKeyword {
    pub keyword: String,
    pub edge: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub edge_keywords: Vec<EdgeKeyword>,
    /// Base edge when no keyword matches ticker or category.
    pub default_edge: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let keyword = |k: &str, edge: f64| EdgeKeyword {
            keyword: k.to_string(),
            edge,
        };
        Self {
            weights: ScoringWeights::default(),
            edge_keywords: vec![
                keyword("sports", 0.3),
                keyword("politics", 0.4),
                keyword("economics", 0.5),
                keyword("weather", 0.2),
                keyword("entertainment", 0.2),
            ],
            default_edge: 0.3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SizingConfig {
    /// Max fraction of capital in a single position.
    pub max_position_pct: f64,
    /// Max fraction of capital deployed across all positions.
    pub max_total_exposure: f64,
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly).
    pub kelly_fraction: f64,
    /// Smallest position worth placing, in currency units.
    pub min_bet: f64,
    /// Positions are floored to a multiple of this amount.
    pub granularity: f64,
    /// Records scoring below this are not sized at all.
    pub min_score_to_size: f64,
    pub low_confidence_multiplier: f64,
    pub medium_confidence_multiplier: f64,
    pub high_confidence_multiplier: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            max_position_pct: 0.15,
            max_total_exposure: 0.60,
            kelly_fraction: 0.25,
            min_bet: 1.0,
            granularity: 1.0,
            min_score_to_size: 50.0,
            low_confidence_multiplier: 0.5,
            medium_confidence_multiplier: 0.75,
            high_confidence_multiplier: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CapitalConfig {
    /// Starting account balance until a live balance feed exists.
    pub initial_balance: f64,
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            initial_balance: 66.13,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/flywheel.db"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DataConfig {
    /// JSON array of market records, re-read on every fetch.
    pub markets_file: PathBuf,
    /// Cached ingest snapshots older than this are refetched on demand.
    pub snapshot_max_age_secs: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            markets_file: PathBuf::from("data/markets.json"),
            snapshot_max_age_secs: 120,
        }
    }
}

impl DataConfig {
    pub fn snapshot_max_age(&self) -> Duration {
        Duration::from_secs(self.snapshot_max_age_secs)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.scoring.weights.validate()?;

        for entry in &self.scoring.edge_keywords {
            if entry.keyword.trim().is_empty() {
                bail!("scoring.edge_keywords contains an empty keyword");
            }
            check_unit("scoring.edge_keywords.edge", entry.edge)?;
        }
        check_unit("scoring.default_edge", self.scoring.default_edge)?;

        let s = &self.sizing;
        check_fraction("sizing.max_position_pct", s.max_position_pct)?;
        check_fraction("sizing.max_total_exposure", s.max_total_exposure)?;
        check_fraction("sizing.kelly_fraction", s.kelly_fraction)?;
        if s.min_bet.is_nan() || s.min_bet <= 0.0 {
            bail!("sizing.min_bet must be positive, got {}", s.min_bet);
        }
        if s.granularity.is_nan() || s.granularity <= 0.0 {
            bail!("sizing.granularity must be positive, got {}", s.granularity);
        }
        if !(0.0..=100.0).contains(&s.min_score_to_size) {
            bail!("sizing.min_score_to_size must be within [0, 100]");
        }

        if self.capital.initial_balance.is_nan() || self.capital.initial_balance < 0.0 {
            bail!("capital.initial_balance must be non-negative");
        }

        for (name, secs) in self.workers.all() {
            if secs == 0 {
                bail!("workers.{name} must be at least one second");
            }
        }
        if self.runtime.tick_ms == 0 || self.runtime.health_interval_secs == 0 {
            bail!("runtime.tick_ms and runtime.health_interval_secs must be non-zero");
        }

        Ok(())
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        bail!("{name} must be within (0, 1], got {value}")
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        bail!("{name} must be within [0, 1], got {value}")
    }
}
