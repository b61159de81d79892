//! Accountant: the capital ledger.
//!
//! Holds the balance and the open exposure under a single lock so the
//! exposure cap can be checked and committed atomically. Everything that
//! needs capital figures goes through [`CapitalSource`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

/// Read access to capital figures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CapitalSource: Send + Sync {
    async fn balance(&self) -> Result<Decimal>;

    async fn total_exposure(&self) -> Result<Decimal>;

    /// Balance and exposure read together.
    async fn snapshot(&self) -> Result<CapitalSnapshot>;
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CapitalSnapshot {
    pub balance: Decimal,
    pub exposure: Decimal,
    pub taken_at: DateTime<Utc>,
}

impl CapitalSnapshot {
    pub fn available(&self) -> Decimal {
        (self.balance - self.exposure).max(Decimal::ZERO)
    }

    /// Exposure as a fraction of balance (0 when the balance is empty).
    pub fn utilisation(&self) -> f64 {
        if self.balance.is_zero() {
            return 0.0;
        }
        (self.exposure / self.balance).to_f64().unwrap_or(0.0)
    }

    pub fn balance_f64(&self) -> f64 {
        self.balance.to_f64().unwrap_or(0.0)
    }

    pub fn exposure_f64(&self) -> f64 {
        self.exposure.to_f64().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("exposure cap exceeded: requested {requested}, headroom {headroom}")]
    CapExceeded { requested: Decimal, headroom: Decimal },

    #[error("cannot close {amount}: only {exposure} is open")]
    OverClose { amount: Decimal, exposure: Decimal },

    #[error("loss of {loss} exceeds the {amount} staked")]
    LossExceedsStake { loss: Decimal, amount: Decimal },

    #[error("balance {balance} would fall below open exposure {exposure}")]
    BalanceBelowExposure { balance: Decimal, exposure: Decimal },

    #[error("invalid exposure cap {0}, expected a fraction in (0, 1]")]
    InvalidCap(Decimal),
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Ledger {
    balance: Decimal,
    exposure: Decimal,
}

pub struct Accountant {
    ledger: Mutex<Ledger>,
    max_total_exposure: Decimal,
}

impl Accountant {
    /// `max_total_exposure` is the fraction of the balance that may be open
    /// at once.
    pub fn new(initial_balance: Decimal, max_total_exposure: Decimal) -> Result<Self, LedgerError> {
        if max_total_exposure <= Decimal::ZERO || max_total_exposure > Decimal::ONE {
            return Err(LedgerError::InvalidCap(max_total_exposure));
        }
        if initial_balance < Decimal::ZERO {
            return Err(LedgerError::BalanceBelowExposure {
                balance: initial_balance,
                exposure: Decimal::ZERO,
            });
        }
        Ok(Self {
            ledger: Mutex::new(Ledger {
                balance: initial_balance,
                exposure: Decimal::ZERO,
            }),
            max_total_exposure,
        })
    }

    pub fn snapshot(&self) -> CapitalSnapshot {
        let ledger = self.ledger.lock();
        CapitalSnapshot {
            balance: ledger.balance,
            exposure: ledger.exposure,
            taken_at: Utc::now(),
        }
    }

    pub fn headroom(&self) -> Decimal {
        let ledger = self.ledger.lock();
        Self::headroom_of(&ledger, self.max_total_exposure)
    }

    fn headroom_of(ledger: &Ledger, cap: Decimal) -> Decimal {
        (ledger.balance * cap - ledger.exposure).max(Decimal::ZERO)
    }

    /// Commit `amount` of new exposure if it fits under the cap.
    pub fn open_position(&self, amount: Decimal) -> Result<CapitalSnapshot, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        let mut ledger = self.ledger.lock();
        let headroom = Self::headroom_of(&ledger, self.max_total_exposure);
        if amount > headroom {
            return Err(LedgerError::CapExceeded {
                requested: amount,
                headroom,
            });
        }
        ledger.exposure += amount;
        debug!(%amount, exposure = %ledger.exposure, "Position opened");
        Ok(CapitalSnapshot {
            balance: ledger.balance,
            exposure: ledger.exposure,
            taken_at: Utc::now(),
        })
    }

    /// Release `amount` of exposure and book `pnl` against the balance.
    pub fn close_position(&self, amount: Decimal, pnl: Decimal) -> Result<CapitalSnapshot, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        if -pnl > amount {
            return Err(LedgerError::LossExceedsStake { loss: -pnl, amount });
        }
        let mut ledger = self.ledger.lock();
        if amount > ledger.exposure {
            return Err(LedgerError::OverClose {
                amount,
                exposure: ledger.exposure,
            });
        }
        ledger.exposure -= amount;
        ledger.balance += pnl;
        info!(%amount, %pnl, balance = %ledger.balance, "Position closed");
        Ok(CapitalSnapshot {
            balance: ledger.balance,
            exposure: ledger.exposure,
            taken_at: Utc::now(),
        })
    }

    /// Replace the balance, e.g. after an external deposit or withdrawal.
    pub fn set_balance(&self, balance: Decimal) -> Result<(), LedgerError> {
        let mut ledger = self.ledger.lock();
        if balance < ledger.exposure {
            return Err(LedgerError::BalanceBelowExposure {
                balance,
                exposure: ledger.exposure,
            });
        }
        ledger.balance = balance;
        Ok(())
    }

    /// `0 ≤ exposure ≤ balance`.
    pub fn invariants_hold(&self) -> bool {
        let ledger = self.ledger.lock();
        ledger.exposure >= Decimal::ZERO && ledger.exposure <= ledger.balance
    }
}

#[async_trait]
impl CapitalSource for Accountant {
    async fn balance(&self) -> Result<Decimal> {
        Ok(self.ledger.lock().balance)
    }

    async fn total_exposure(&self) -> Result<Decimal> {
        Ok(self.ledger.lock().exposure)
    }

    async fn snapshot(&self) -> Result<CapitalSnapshot> {
        Ok(Accountant::snapshot(self))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn make_accountant(balance: Decimal) -> Accountant {
        Accountant::new(balance, dec!(0.60)).unwrap()
    }

    #[test]
    fn test_new_ledger_is_flat() {
        let acct = make_accountant(dec!(66.13));
        let snap = acct.snapshot();
        assert_eq!(snap.balance, dec!(66.13));
        assert_eq!(snap.exposure, Decimal::ZERO);
        assert_eq!(snap.available(), dec!(66.13));
        assert_eq!(snap.utilisation(), 0.0);
        assert!(acct.invariants_hold());
    }

    #[test]
    fn test_invalid_cap_rejected() {
        assert!(matches!(
            Accountant::new(dec!(100), dec!(1.5)),
            Err(LedgerError::InvalidCap(_))
        ));
        assert!(Accountant::new(dec!(100), Decimal::ZERO).is_err());
    }

    #[test]
    fn test_open_within_headroom() {
        let acct = make_accountant(dec!(1000));
        let snap = acct.open_position(dec!(250)).unwrap();
        assert_eq!(snap.exposure, dec!(250));
        assert_eq!(acct.headroom(), dec!(350));
    }

    #[test]
    fn test_open_beyond_cap_rejected() {
        let acct = make_accountant(dec!(1000));
        acct.open_position(dec!(500)).unwrap();
        let err = acct.open_position(dec!(101)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::CapExceeded {
                requested: dec!(101),
                headroom: dec!(100)
            }
        );
        // Nothing committed on rejection.
        assert_eq!(acct.snapshot().exposure, dec!(500));
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let acct = make_accountant(dec!(1000));
        assert!(matches!(
            acct.open_position(Decimal::ZERO),
            Err(LedgerError::NonPositiveAmount(_))
        ));
        assert!(acct.open_position(dec!(-5)).is_err());
    }

    #[test]
    fn test_close_books_pnl() {
        let acct = make_accountant(dec!(100));
        acct.open_position(dec!(20)).unwrap();

        let snap = acct.close_position(dec!(20), dec!(7.50)).unwrap();
        assert_eq!(snap.exposure, Decimal::ZERO);
        assert_eq!(snap.balance, dec!(107.50));

        acct.open_position(dec!(10)).unwrap();
        let snap = acct.close_position(dec!(10), dec!(-10)).unwrap();
        assert_eq!(snap.balance, dec!(97.50));
        assert!(acct.invariants_hold());
    }

    #[test]
    fn test_close_rejects_bad_inputs() {
        let acct = make_accountant(dec!(100));
        acct.open_position(dec!(10)).unwrap();
        assert!(matches!(
            acct.close_position(dec!(11), Decimal::ZERO),
            Err(LedgerError::OverClose { .. })
        ));
        assert!(matches!(
            acct.close_position(dec!(10), dec!(-11)),
            Err(LedgerError::LossExceedsStake { .. })
        ));
    }

    #[test]
    fn test_set_balance_guards_exposure() {
        let acct = make_accountant(dec!(100));
        acct.open_position(dec!(40)).unwrap();
        assert!(acct.set_balance(dec!(39)).is_err());
        acct.set_balance(dec!(200)).unwrap();
        assert_eq!(acct.snapshot().balance, dec!(200));
    }

    #[test]
    fn test_concurrent_opens_never_breach_cap() {
        let acct = Arc::new(make_accountant(dec!(1000)));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let acct = Arc::clone(&acct);
                std::thread::spawn(move || acct.open_position(dec!(50)).is_ok())
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        // 600 of headroom fits exactly twelve 50s.
        assert_eq!(accepted, 12);
        assert_eq!(acct.snapshot().exposure, dec!(600));
    }

    #[tokio::test]
    async fn test_capital_source_reads() {
        let acct = make_accountant(dec!(500));
        acct.open_position(dec!(100)).unwrap();
        let source: &dyn CapitalSource = &acct;
        assert_eq!(source.balance().await.unwrap(), dec!(500));
        assert_eq!(source.total_exposure().await.unwrap(), dec!(100));
        let snap = source.snapshot().await.unwrap();
        assert!((snap.utilisation() - 0.2).abs() < 1e-12);
    }
}
