//! Withdrawal requests.
//!
//! A request moves from pending to approved or rejected, and both are final.
//! Approval re-checks the reward balance under a row lock and debits it in
//! the same transaction, so concurrent approvals can never overdraw.

use std::sync::Arc;

use rust_decimal::Decimal;

use harvest_core::{
    LedgerError, Resolution, Result, RewardId, UserId, Withdrawal, WithdrawalId, WithdrawalStatus,
};
use harvest_store::{entity, Queries, Store};

use crate::notify::dispatch;
use crate::timeout::within;
use crate::Shared;

/// Owns withdrawal records.
pub struct WithdrawalLedger<S: Store> {
    shared: Arc<Shared<S>>,
}

impl<S: Store> Clone for WithdrawalLedger<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Store> WithdrawalLedger<S> {
    pub(crate) fn new(shared: Arc<Shared<S>>) -> Self {
        Self { shared }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Request a withdrawal from one of the owner's rewards.
    pub async fn create(
        &self,
        owner: UserId,
        reward_id: RewardId,
        amount: Decimal,
    ) -> Result<WithdrawalId> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidArgument(format!(
                "withdrawal amount must be positive, got {amount}"
            )));
        }

        let withdrawal = within(self.shared.config.call_timeout, "create_withdrawal", async {
            let mut session = self.shared.store.acquire().await?;
            let reward = session
                .reward(reward_id)
                .await?
                .filter(|r| r.owner == owner)
                .ok_or_else(|| LedgerError::not_found(entity::REWARD, reward_id))?;

            if !reward.covers(amount) {
                return Err(LedgerError::InsufficientFunds {
                    available: reward.available(),
                    requested: amount,
                });
            }

            let withdrawal =
                Withdrawal::pending(owner, reward_id, amount, self.shared.clock.now());
            session.insert_withdrawal(&withdrawal).await?;
            Ok(withdrawal)
        })
        .await?;

        tracing::info!(
            withdrawal_id = %withdrawal.id,
            reward_id = %reward_id,
            user_id = %owner,
            amount = %amount,
            "Withdrawal requested"
        );

        dispatch(
            &self.shared.notifier,
            "New withdrawal request".to_string(),
            format!(
                "User {owner} requested a withdrawal of {amount} from reward {reward_id} ({})",
                withdrawal.id
            ),
        );

        Ok(withdrawal.id)
    }

    /// Approve a pending withdrawal and debit its reward.
    pub async fn approve(&self, id: WithdrawalId) -> Result<()> {
        let withdrawal = within(self.shared.config.approval_timeout, "approve_withdrawal", async {
            let mut tx = self.shared.store.begin().await?;
            let mut withdrawal = tx
                .withdrawal_for_update(id)
                .await?
                .ok_or_else(|| LedgerError::not_found(entity::WITHDRAWAL, id))?;
            withdrawal.ensure_pending()?;

            let reward = tx
                .reward_for_update(withdrawal.reward_id)
                .await?
                .ok_or_else(|| LedgerError::not_found(entity::REWARD, withdrawal.reward_id))?;
            let insufficient = || LedgerError::InsufficientFunds {
                available: reward.available(),
                requested: withdrawal.amount,
            };
            if !reward.covers(withdrawal.amount) {
                return Err(insufficient());
            }

            let resolution = Resolution::Approved {
                at: self.shared.clock.now(),
            };
            if !tx.resolve_withdrawal(id, &resolution).await? {
                return Err(resolved_concurrently(&mut tx, id).await);
            }
            if !tx.add_withdrawn(reward.id, withdrawal.amount).await? {
                return Err(insufficient());
            }
            tx.commit().await?;

            resolution.apply(&mut withdrawal);
            Ok(withdrawal)
        })
        .await?;

        tracing::info!(
            withdrawal_id = %id,
            reward_id = %withdrawal.reward_id,
            amount = %withdrawal.amount,
            "Withdrawal approved"
        );
        Ok(())
    }

    /// Reject a pending withdrawal. The reward is not touched.
    pub async fn reject(&self, id: WithdrawalId, reason: impl Into<String>) -> Result<()> {
        let resolution = Resolution::Rejected {
            at: self.shared.clock.now(),
            reason: reason.into(),
        };

        within(self.shared.config.call_timeout, "reject_withdrawal", async {
            let mut session = self.shared.store.acquire().await?;
            let withdrawal = session
                .withdrawal(id)
                .await?
                .ok_or_else(|| LedgerError::not_found(entity::WITHDRAWAL, id))?;
            withdrawal.ensure_pending()?;

            if session.resolve_withdrawal(id, &resolution).await? {
                Ok(())
            } else {
                Err(resolved_concurrently(&mut session, id).await)
            }
        })
        .await?;

        tracing::info!(withdrawal_id = %id, "Withdrawal rejected");
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Get a withdrawal by ID.
    pub async fn get(&self, id: WithdrawalId) -> Result<Withdrawal> {
        within(self.shared.config.call_timeout, "get_withdrawal", async {
            let mut session = self.shared.store.acquire().await?;
            session
                .withdrawal(id)
                .await?
                .ok_or_else(|| LedgerError::not_found(entity::WITHDRAWAL, id))
        })
        .await
    }

    /// A user's withdrawals, newest first.
    pub async fn by_user(&self, owner: UserId) -> Result<Vec<Withdrawal>> {
        within(self.shared.config.call_timeout, "withdrawals_by_user", async {
            let mut session = self.shared.store.acquire().await?;
            Ok(session.withdrawals_by_owner(owner).await?)
        })
        .await
    }

    /// Every withdrawal, newest first.
    pub async fn all(&self) -> Result<Vec<Withdrawal>> {
        within(self.shared.config.call_timeout, "all_withdrawals", async {
            let mut session = self.shared.store.acquire().await?;
            Ok(session.all_withdrawals().await?)
        })
        .await
    }

    /// Every withdrawal awaiting a decision.
    pub async fn pending(&self) -> Result<Vec<Withdrawal>> {
        within(self.shared.config.call_timeout, "pending_withdrawals", async {
            let mut session = self.shared.store.acquire().await?;
            Ok(session
                .withdrawals_by_status(WithdrawalStatus::Pending)
                .await?)
        })
        .await
    }
}

/// Resolved by someone else since the read: report the status it holds now.
async fn resolved_concurrently<Q: Queries>(session: &mut Q, id: WithdrawalId) -> LedgerError {
    match session.withdrawal(id).await {
        Ok(Some(current)) => already_processed(&current),
        Ok(None) => LedgerError::not_found(entity::WITHDRAWAL, id),
        Err(e) => e.into(),
    }
}

fn already_processed(withdrawal: &Withdrawal) -> LedgerError {
    LedgerError::AlreadyProcessed {
        entity: entity::WITHDRAWAL,
        id: withdrawal.id.to_string(),
        status: withdrawal.status.to_string(),
    }
}
