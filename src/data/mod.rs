//! Market data sources.
//!
//! Defines the `MarketSource` trait the ingest supervisor pulls from, and
//! the file-backed snapshot source used when no live venue is wired in.

pub mod snapshot;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::MarketRecord;

pub use snapshot::SnapshotFileSource;

/// Abstraction over a supplier of active market records.
///
/// Implementations return only markets that are open for trading.
/// Record order is not significant.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Human-readable source name for logs.
    fn name(&self) -> &str;

    async fn fetch_active_markets(&self) -> Result<Vec<MarketRecord>>;
}
