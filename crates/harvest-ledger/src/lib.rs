//! The harvest money engine.
//!
//! Ledgers own one record type each and share short transactions where a
//! change spans two of them:
//!
//! - [`DepositLedger`]: deposit lifecycle; approval creates the paired reward
//!   in the same transaction.
//! - [`RewardLedger`]: accrued versus withdrawn balances and daily accrual.
//! - [`WithdrawalLedger`]: withdrawal requests; approval debits the reward in
//!   the same transaction.
//! - [`TariffCatalog`]: read-only tariff lookup.
//! - [`AccrualScheduler`]: the periodic accrual driver.
//! - [`OperationsAggregator`]: a user's deposits, withdrawals and rewards in
//!   one view.
//!
//! Every operation runs under a per-call timeout. A timed-out call drops its
//! transaction, which rolls back, and reports `LedgerError::Transient`.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use harvest_ledger::{Engine, LedgerConfig, LogNotifier, SystemClock};
//! use harvest_store::MemoryStore;
//!
//! let engine = Engine::new(
//!     MemoryStore::new(),
//!     Arc::new(SystemClock),
//!     Arc::new(LogNotifier),
//!     LedgerConfig::default(),
//! );
//! let id = engine.deposits.request(owner, dec!(1000)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

pub mod clock;
pub mod deposits;
pub mod notify;
pub mod operations;
pub mod rewards;
pub mod scheduler;
pub mod tariffs;
mod timeout;
pub mod withdrawals;

use std::sync::Arc;
use std::time::Duration;

use harvest_store::Store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use deposits::{AdminDeposit, DepositLedger};
pub use notify::{LogNotifier, Notifier, NotifyError};
pub use operations::OperationsAggregator;
pub use rewards::RewardLedger;
pub use scheduler::{AccrualFailure, AccrualScheduler, TickError, TickReport};
pub use tariffs::TariffCatalog;
pub use withdrawals::WithdrawalLedger;

/// Per-call limits for ledger operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Limit for ordinary calls (default: 2s).
    pub call_timeout: Duration,

    /// Limit for withdrawal approval, which locks two rows (default: 4s).
    pub approval_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(2),
            approval_timeout: Duration::from_secs(4),
        }
    }
}

/// Collaborators every ledger needs.
pub(crate) struct Shared<S> {
    pub(crate) store: S,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) config: LedgerConfig,
}

/// All ledgers wired over one store.
pub struct Engine<S: Store> {
    /// Deposit lifecycle.
    pub deposits: DepositLedger<S>,

    /// Reward balances and accrual.
    pub rewards: RewardLedger<S>,

    /// Withdrawal requests.
    pub withdrawals: WithdrawalLedger<S>,

    /// Tariff lookup.
    pub tariffs: TariffCatalog<S>,

    /// Per-user combined view.
    pub operations: OperationsAggregator<S>,
}

impl<S: Store> Engine<S> {
    /// Wire every ledger over `store`.
    pub fn new(
        store: S,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        config: LedgerConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            store,
            clock,
            notifier,
            config,
        });

        let tariffs = TariffCatalog::new(Arc::clone(&shared));
        let rewards = RewardLedger::new(Arc::clone(&shared));
        let deposits = DepositLedger::new(Arc::clone(&shared), tariffs.clone());
        let withdrawals = WithdrawalLedger::new(shared);
        let operations =
            OperationsAggregator::new(deposits.clone(), withdrawals.clone(), rewards.clone());

        Self {
            deposits,
            rewards,
            withdrawals,
            tariffs,
            operations,
        }
    }

    /// A scheduler that accrues every approved deposit once per `interval`.
    #[must_use]
    pub fn scheduler(&self, interval: Duration) -> AccrualScheduler<S> {
        AccrualScheduler::new(self.deposits.clone(), self.rewards.clone(), interval)
    }
}
