//! Persistence layer.
//!
//! Opportunities are the only persisted values. The repo supervisor owns
//! the store; everyone else goes through [`OpportunityStore`].

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::types::Opportunity;

pub use sqlite::SqliteStore;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OpportunityStore: Send + Sync {
    /// Persist a batch as `active`. Returns the assigned ids in input order.
    async fn store_opportunities(&self, opportunities: Vec<Opportunity>) -> Result<Vec<i64>>;

    /// Active opportunities, best score first, newest first among ties.
    async fn get_active_opportunities(&self, limit: usize) -> Result<Vec<Opportunity>>;

    /// `active → executed`. Fails for unknown or already-executed ids.
    async fn mark_executed(&self, id: i64) -> Result<()>;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("opportunity {0} not found")]
    NotFound(i64),

    #[error("opportunity {0} is already executed")]
    AlreadyExecuted(i64),

    #[error("store is closed")]
    Closed,
}
