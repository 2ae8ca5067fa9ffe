//! Reward balances and daily accrual.

use std::sync::Arc;

use rust_decimal::Decimal;

use harvest_core::{
    plan_accrual, AccrualStep, DepositId, DepositStatus, LedgerError, Result, Reward, RewardId,
    UserId,
};
use harvest_store::{entity, Queries, Store};

use crate::timeout::within;
use crate::Shared;

/// Owns reward records: accrued and withdrawn totals.
pub struct RewardLedger<S: Store> {
    shared: Arc<Shared<S>>,
}

impl<S: Store> Clone for RewardLedger<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Store> RewardLedger<S> {
    pub(crate) fn new(shared: Arc<Shared<S>>) -> Self {
        Self { shared }
    }

    /// Insert a reward, typically a referral bonus.
    pub async fn create(&self, reward: Reward) -> Result<()> {
        if reward.accrued.is_sign_negative() {
            return Err(LedgerError::InvalidArgument(format!(
                "reward amount must not be negative, got {}",
                reward.accrued
            )));
        }
        if !reward.withdrawn.is_zero() {
            return Err(LedgerError::InvalidArgument(
                "a new reward cannot start with withdrawals".into(),
            ));
        }

        within(self.shared.config.call_timeout, "create_reward", async {
            let mut session = self.shared.store.acquire().await?;
            session.insert_reward(&reward).await?;
            Ok(())
        })
        .await?;

        tracing::info!(
            reward_id = %reward.id,
            user_id = %reward.owner,
            kind = %reward.kind,
            amount = %reward.accrued,
            "Reward created"
        );
        Ok(())
    }

    /// Credit whole days elapsed since the reward's last accrual.
    ///
    /// The first call only anchors the clock. Calls less than a day apart
    /// change nothing, so this is safe to invoke as often as wanted. A deposit
    /// that is no longer approved is left alone.
    pub async fn accrue_daily_for_deposit(
        &self,
        deposit_id: DepositId,
        daily_rate: Decimal,
    ) -> Result<AccrualStep> {
        let step = within(self.shared.config.call_timeout, "accrue_reward", async {
            let now = self.shared.clock.now();
            let mut tx = self.shared.store.begin().await?;

            let deposit = tx
                .deposit_for_update(deposit_id)
                .await?
                .ok_or_else(|| LedgerError::not_found(entity::DEPOSIT, deposit_id))?;
            if deposit.status != DepositStatus::Approved {
                return Ok(AccrualStep::Idle);
            }

            let reward = tx
                .reward_by_deposit_for_update(deposit_id)
                .await?
                .ok_or_else(|| LedgerError::not_found(entity::REWARD, deposit_id))?;

            let step = plan_accrual(reward.last_accrued_at, now, deposit.amount, daily_rate)?;
            if let Some(anchor) = step.anchor() {
                tx.add_accrued(reward.id, step.delta(), anchor).await?;
                tx.commit().await?;
            }
            Ok(step)
        })
        .await?;

        match step {
            AccrualStep::Accrue { days, delta, .. } => tracing::info!(
                deposit_id = %deposit_id,
                days,
                delta = %delta,
                "Reward accrued"
            ),
            AccrualStep::Anchor { at } => {
                tracing::debug!(deposit_id = %deposit_id, anchored_at = %at, "Accrual clock anchored");
            }
            AccrualStep::Idle => {
                tracing::debug!(deposit_id = %deposit_id, "Nothing to accrue");
            }
        }
        Ok(step)
    }

    /// Add `delta` to a reward's withdrawn total.
    ///
    /// Refuses to take the available balance below zero.
    pub async fn update_withdrawn(&self, id: RewardId, delta: Decimal) -> Result<()> {
        if delta <= Decimal::ZERO {
            return Err(LedgerError::InvalidArgument(format!(
                "withdrawn delta must be positive, got {delta}"
            )));
        }

        within(self.shared.config.call_timeout, "update_withdrawn", async {
            let mut session = self.shared.store.acquire().await?;
            if session.add_withdrawn(id, delta).await? {
                return Ok(());
            }
            match session.reward(id).await? {
                Some(reward) => Err(LedgerError::InsufficientFunds {
                    available: reward.available(),
                    requested: delta,
                }),
                None => Err(LedgerError::not_found(entity::REWARD, id)),
            }
        })
        .await?;

        tracing::info!(reward_id = %id, delta = %delta, "Reward withdrawn total updated");
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Get a reward by ID.
    pub async fn get(&self, id: RewardId) -> Result<Reward> {
        within(self.shared.config.call_timeout, "get_reward", async {
            let mut session = self.shared.store.acquire().await?;
            session
                .reward(id)
                .await?
                .ok_or_else(|| LedgerError::not_found(entity::REWARD, id))
        })
        .await
    }

    /// A user's rewards, newest first.
    pub async fn by_owner(&self, owner: UserId) -> Result<Vec<Reward>> {
        within(self.shared.config.call_timeout, "rewards_by_owner", async {
            let mut session = self.shared.store.acquire().await?;
            Ok(session.rewards_by_owner(owner).await?)
        })
        .await
    }

    /// The reward paired with a deposit.
    pub async fn by_deposit(&self, deposit_id: DepositId) -> Result<Reward> {
        within(self.shared.config.call_timeout, "reward_by_deposit", async {
            let mut session = self.shared.store.acquire().await?;
            session
                .reward_by_deposit(deposit_id)
                .await?
                .ok_or_else(|| LedgerError::not_found(entity::REWARD, deposit_id))
        })
        .await
    }

    /// Rewards paired with any of the given deposits.
    pub async fn by_deposits(&self, deposit_ids: &[DepositId]) -> Result<Vec<Reward>> {
        within(self.shared.config.call_timeout, "rewards_by_deposits", async {
            let mut session = self.shared.store.acquire().await?;
            Ok(session.rewards_by_deposits(deposit_ids).await?)
        })
        .await
    }

    /// Available balance summed across every reward.
    pub async fn total_available(&self) -> Result<Decimal> {
        within(self.shared.config.call_timeout, "total_available", async {
            let mut session = self.shared.store.acquire().await?;
            Ok(session.total_available().await?)
        })
        .await
    }

    /// Available balance summed across one user's rewards.
    pub async fn net_balance(&self, owner: UserId) -> Result<Decimal> {
        let rewards = self.by_owner(owner).await?;
        rewards
            .iter()
            .try_fold(Decimal::ZERO, |total, reward| {
                total.checked_add(reward.available())
            })
            .ok_or_else(|| LedgerError::Overflow(format!("net balance of user {owner}")))
    }
}
