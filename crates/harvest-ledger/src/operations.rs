//! A user's deposits, withdrawals and rewards in one view.

use harvest_core::{Operations, Result, UserId};
use harvest_store::Store;

use crate::deposits::DepositLedger;
use crate::rewards::RewardLedger;
use crate::withdrawals::WithdrawalLedger;

/// Fans one request out to the three ledgers.
pub struct OperationsAggregator<S: Store> {
    deposits: DepositLedger<S>,
    withdrawals: WithdrawalLedger<S>,
    rewards: RewardLedger<S>,
}

impl<S: Store> Clone for OperationsAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            deposits: self.deposits.clone(),
            withdrawals: self.withdrawals.clone(),
            rewards: self.rewards.clone(),
        }
    }
}

impl<S: Store> OperationsAggregator<S> {
    pub(crate) fn new(
        deposits: DepositLedger<S>,
        withdrawals: WithdrawalLedger<S>,
        rewards: RewardLedger<S>,
    ) -> Self {
        Self {
            deposits,
            withdrawals,
            rewards,
        }
    }

    /// Everything `owner` has on the books.
    ///
    /// The three reads run concurrently and independently, so the result is
    /// not a point-in-time snapshot.
    pub async fn list_user_operations(&self, owner: UserId) -> Result<Operations> {
        let (deposits, withdrawals, rewards) = tokio::try_join!(
            self.deposits.by_owner(owner),
            self.withdrawals.by_user(owner),
            self.rewards.by_owner(owner),
        )?;

        Ok(Operations {
            deposits,
            withdrawals,
            rewards,
        })
    }
}
