//! Periodic reward accrual.
//!
//! Each tick walks every approved deposit and accrues its reward. Every
//! deposit is accrued in its own transaction; a failure on one is logged and
//! the tick moves on. Ticks never overlap: a tick that overruns the interval
//! makes the scheduler skip the missed ticks instead of queueing them.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use harvest_core::{DepositId, LedgerError};
use harvest_store::Store;
use tokio::time::MissedTickBehavior;

use crate::deposits::DepositLedger;
use crate::rewards::RewardLedger;

/// Shortest interval the scheduler accepts.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// One deposit that failed to accrue during a tick.
#[derive(Debug)]
pub struct AccrualFailure {
    /// The deposit whose reward was not accrued.
    pub deposit_id: DepositId,

    /// What went wrong.
    pub error: LedgerError,
}

/// Outcome of one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Deposits whose accrual call succeeded (including no-op calls).
    pub processed: usize,

    /// Deposits without a positive daily rate.
    pub skipped: usize,

    /// Deposits whose accrual call failed.
    pub failures: Vec<AccrualFailure>,
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed, {} skipped, {} failed",
            self.processed,
            self.skipped,
            self.failures.len()
        )
    }
}

/// A tick that did not accrue everything it should have.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// The approved deposits could not be listed; nothing was accrued.
    #[error("could not list approved deposits: {0}")]
    Listing(#[source] LedgerError),

    /// Some deposits failed; the rest were accrued.
    #[error("accrual tick incomplete: {0}")]
    Partial(TickReport),
}

/// Drives [`RewardLedger::accrue_daily_for_deposit`] for every approved
/// deposit on a fixed interval.
pub struct AccrualScheduler<S: Store> {
    deposits: DepositLedger<S>,
    rewards: RewardLedger<S>,
    interval: Duration,
}

impl<S: Store> AccrualScheduler<S> {
    /// A scheduler ticking every `interval`, raised to one second if shorter.
    #[must_use]
    pub fn new(deposits: DepositLedger<S>, rewards: RewardLedger<S>, interval: Duration) -> Self {
        Self {
            deposits,
            rewards,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Accrue every approved deposit once.
    pub async fn tick(&self) -> Result<TickReport, TickError> {
        let deposits = self.deposits.approved().await.map_err(TickError::Listing)?;
        let mut report = TickReport::default();

        for deposit in deposits {
            let Some(rate) = deposit.daily_rate().filter(|_| deposit.is_accruing()) else {
                report.skipped += 1;
                continue;
            };

            match self.rewards.accrue_daily_for_deposit(deposit.id, rate).await {
                Ok(_) => report.processed += 1,
                Err(error) => {
                    tracing::warn!(
                        deposit_id = %deposit.id,
                        error = %error,
                        "Accrual failed for deposit"
                    );
                    report.failures.push(AccrualFailure {
                        deposit_id: deposit.id,
                        error,
                    });
                }
            }
        }

        if report.failures.is_empty() {
            Ok(report)
        } else {
            Err(TickError::Partial(report))
        }
    }

    /// Tick on the interval until `shutdown` resolves.
    ///
    /// The first tick runs immediately. A tick in progress is finished before
    /// shutdown is observed.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(interval_secs = self.interval.as_secs(), "Accrual scheduler started");

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => match self.tick().await {
                    Ok(report) => tracing::info!(%report, "Accrual tick finished"),
                    Err(e) => tracing::error!(error = %e, "Accrual tick failed"),
                },
            }
        }

        tracing::info!("Accrual scheduler stopped");
    }
}
