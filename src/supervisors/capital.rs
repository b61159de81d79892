//! Capital supervisor: sole owner of the capital ledger.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{CapitalConfig, SizingConfig};
use crate::engine::accountant::{Accountant, CapitalSnapshot, CapitalSource};
use crate::engine::supervisor::Supervisable;
use crate::engine::worker::{Worker, WorkerTask};

pub const NAME: &str = "Capital";

/// Utilisation (exposure / balance) above which each check warns.
const UTILISATION_WARN: Decimal = dec!(0.50);

fn to_decimal(name: &str, value: f64) -> Result<Decimal> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(2))
        .with_context(|| format!("{name} is not representable: {value}"))
}

/// Audits the ledger and reports utilisation.
struct PortfolioWorker {
    accountant: Arc<Accountant>,
}

#[async_trait]
impl WorkerTask for PortfolioWorker {
    fn name(&self) -> &str {
        "PortfolioWorker"
    }

    async fn run_once(&self) -> Result<()> {
        if !self.accountant.invariants_hold() {
            bail!("capital ledger out of balance");
        }
        let snap = self.accountant.snapshot();
        if snap.exposure > snap.balance * UTILISATION_WARN {
            warn!(
                balance = %snap.balance,
                exposure = %snap.exposure,
                "Capital utilisation is high"
            );
        }
        debug!(
            balance = %snap.balance,
            exposure = %snap.exposure,
            utilisation = format!("{:.1}%", snap.utilisation() * 100.0),
            "Portfolio check"
        );
        Ok(())
    }
}

pub struct CapitalSupervisor {
    accountant: Arc<Accountant>,
    cadence: Duration,
}

impl CapitalSupervisor {
    pub fn new(capital: &CapitalConfig, sizing: &SizingConfig, cadence: Duration) -> Result<Self> {
        let balance = to_decimal("capital.initial_balance", capital.initial_balance)?;
        let cap = to_decimal("sizing.max_total_exposure", sizing.max_total_exposure)?;
        Ok(Self {
            accountant: Arc::new(Accountant::new(balance, cap)?),
            cadence,
        })
    }

    /// The ledger, for the execution side that opens and closes positions.
    pub fn accountant(&self) -> &Arc<Accountant> {
        &self.accountant
    }
}

#[async_trait]
impl Supervisable for CapitalSupervisor {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&self) -> Result<Vec<Worker>> {
        let worker = PortfolioWorker {
            accountant: Arc::clone(&self.accountant),
        };
        Ok(vec![Worker::new(worker, self.cadence)])
    }

    async fn main_loop(&self) -> Result<()> {
        Ok(())
    }

    fn self_healthy(&self) -> bool {
        self.accountant.invariants_hold()
    }
}

#[async_trait]
impl CapitalSource for CapitalSupervisor {
    async fn balance(&self) -> Result<Decimal> {
        self.accountant.balance().await
    }

    async fn total_exposure(&self) -> Result<Decimal> {
        self.accountant.total_exposure().await
    }

    async fn snapshot(&self) -> Result<CapitalSnapshot> {
        Ok(self.accountant.snapshot())
    }
}
