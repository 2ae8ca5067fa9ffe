//! Deposit lifecycle.
//!
//! A deposit is requested (pending), approved with terms, and eventually
//! closed. Approval and admin backfill create the paired reward row in the
//! same transaction as the deposit write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use harvest_core::{
    ApprovalPolicy, Deposit, DepositId, DepositStatus, DepositTerms, LedgerError, Result, Reward,
    UserId,
};
use harvest_store::{entity, Queries, Store};

use crate::notify::dispatch;
use crate::tariffs::TariffCatalog;
use crate::timeout::within;
use crate::Shared;

/// A deposit entered directly in the approved state, typically backfilled.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminDeposit {
    /// Owning user.
    pub owner: UserId,

    /// Principal amount.
    pub amount: Decimal,

    /// When the deposit was made; may be in the past.
    pub created_at: DateTime<Utc>,

    /// When it was approved (default: `created_at`).
    pub approved_at: Option<DateTime<Utc>>,

    /// Where the terms come from.
    pub policy: ApprovalPolicy,

    /// Opening accrued amount on the paired reward (default: zero).
    pub initial_reward: Option<Decimal>,
}

/// Owns deposit records and their status transitions.
pub struct DepositLedger<S: Store> {
    shared: Arc<Shared<S>>,
    tariffs: TariffCatalog<S>,
}

impl<S: Store> Clone for DepositLedger<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            tariffs: self.tariffs.clone(),
        }
    }
}

impl<S: Store> DepositLedger<S> {
    pub(crate) fn new(shared: Arc<Shared<S>>, tariffs: TariffCatalog<S>) -> Self {
        Self { shared, tariffs }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Record a user's deposit request for operator approval.
    pub async fn request(&self, owner: UserId, amount: Decimal) -> Result<DepositId> {
        ensure_positive(amount)?;

        let deposit = Deposit::pending(owner, amount, self.shared.clock.now());
        within(self.shared.config.call_timeout, "request_deposit", async {
            let mut session = self.shared.store.acquire().await?;
            session.insert_deposit(&deposit).await?;
            Ok(())
        })
        .await?;

        tracing::info!(
            deposit_id = %deposit.id,
            user_id = %owner,
            amount = %amount,
            "Deposit requested"
        );

        dispatch(
            &self.shared.notifier,
            "New deposit request".to_string(),
            format!("User {owner} requested a deposit of {amount} ({})", deposit.id),
        );

        Ok(deposit.id)
    }

    /// Approve a pending deposit and open its reward.
    ///
    /// The reward starts with the deposit principal as its accrued amount.
    pub async fn approve(
        &self,
        id: DepositId,
        approved_at: DateTime<Utc>,
        policy: ApprovalPolicy,
    ) -> Result<()> {
        policy.validate()?;

        let terms = within(self.shared.config.call_timeout, "approve_deposit", async {
            let terms = self.resolve_terms(policy).await?;

            let mut tx = self.shared.store.begin().await?;
            let deposit = tx
                .deposit_for_update(id)
                .await?
                .ok_or_else(|| LedgerError::not_found(entity::DEPOSIT, id))?;

            if deposit.status != DepositStatus::Pending {
                return Err(already_processed(&deposit));
            }
            if !tx.approve_deposit(id, approved_at, terms).await? {
                return Err(changed_concurrently(&mut tx, id).await);
            }

            let approved = Deposit {
                status: DepositStatus::Approved,
                approved_at: Some(approved_at),
                terms: Some(terms),
                ..deposit
            };
            let reward = Reward::for_deposit(&approved, approved.amount, self.shared.clock.now());
            tx.insert_reward(&reward).await?;
            tx.commit().await?;
            Ok(terms)
        })
        .await?;

        tracing::info!(
            deposit_id = %id,
            daily_rate = %terms.daily_rate,
            lock_until = %terms.lock_until,
            "Deposit approved"
        );
        Ok(())
    }

    /// Enter an already-approved deposit with its reward, skipping the
    /// pending stage.
    pub async fn create_approved_by_admin(&self, input: AdminDeposit) -> Result<DepositId> {
        ensure_positive(input.amount)?;
        input.policy.validate()?;
        let initial_reward = input.initial_reward.unwrap_or(Decimal::ZERO);
        if initial_reward.is_sign_negative() {
            return Err(LedgerError::InvalidArgument(format!(
                "initial reward amount must not be negative, got {initial_reward}"
            )));
        }

        let deposit = within(self.shared.config.call_timeout, "create_deposit", async {
            let terms = self.resolve_terms(input.policy).await?;
            let deposit = Deposit::approved(
                input.owner,
                input.amount,
                input.created_at,
                input.approved_at.unwrap_or(input.created_at),
                terms,
            );
            let reward = Reward::for_deposit(&deposit, initial_reward, self.shared.clock.now());

            let mut tx = self.shared.store.begin().await?;
            tx.insert_deposit(&deposit).await?;
            tx.insert_reward(&reward).await?;
            tx.commit().await?;
            Ok(deposit)
        })
        .await?;

        tracing::info!(
            deposit_id = %deposit.id,
            user_id = %deposit.owner,
            amount = %deposit.amount,
            initial_reward = %initial_reward,
            "Approved deposit created by admin"
        );
        Ok(deposit.id)
    }

    /// Close an approved deposit. The reward row is left as it is.
    pub async fn close(&self, id: DepositId) -> Result<()> {
        within(self.shared.config.call_timeout, "close_deposit", async {
            let mut tx = self.shared.store.begin().await?;
            let deposit = tx
                .deposit_for_update(id)
                .await?
                .ok_or_else(|| LedgerError::not_found(entity::DEPOSIT, id))?;

            match deposit.status {
                DepositStatus::Pending => {
                    return Err(LedgerError::InvalidArgument(format!(
                        "deposit {id} is pending; only approved deposits can be closed"
                    )))
                }
                DepositStatus::Closed => return Err(already_processed(&deposit)),
                DepositStatus::Approved => {}
            }

            if !tx
                .transition_deposit(id, DepositStatus::Approved, DepositStatus::Closed)
                .await?
            {
                return Err(changed_concurrently(&mut tx, id).await);
            }
            tx.commit().await?;
            Ok(())
        })
        .await?;

        tracing::info!(deposit_id = %id, "Deposit closed");
        Ok(())
    }

    /// Remove a deposit permanently. Its reward, if any, is kept.
    pub async fn delete_by_admin(&self, id: DepositId) -> Result<()> {
        within(self.shared.config.call_timeout, "delete_deposit", async {
            let mut session = self.shared.store.acquire().await?;
            if session.delete_deposit(id).await? {
                Ok(())
            } else {
                Err(LedgerError::not_found(entity::DEPOSIT, id))
            }
        })
        .await?;

        tracing::warn!(deposit_id = %id, "Deposit deleted by admin");
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Get a deposit by ID.
    pub async fn get(&self, id: DepositId) -> Result<Deposit> {
        within(self.shared.config.call_timeout, "get_deposit", async {
            let mut session = self.shared.store.acquire().await?;
            session
                .deposit(id)
                .await?
                .ok_or_else(|| LedgerError::not_found(entity::DEPOSIT, id))
        })
        .await
    }

    /// A user's deposits, newest first.
    pub async fn by_owner(&self, owner: UserId) -> Result<Vec<Deposit>> {
        within(self.shared.config.call_timeout, "deposits_by_owner", async {
            let mut session = self.shared.store.acquire().await?;
            Ok(session.deposits_by_owner(owner).await?)
        })
        .await
    }

    /// Every approved deposit.
    pub async fn approved(&self) -> Result<Vec<Deposit>> {
        self.by_status(DepositStatus::Approved).await
    }

    /// Every deposit awaiting approval.
    pub async fn pending(&self) -> Result<Vec<Deposit>> {
        self.by_status(DepositStatus::Pending).await
    }

    /// A user's approved deposits.
    pub async fn approved_by_owner(&self, owner: UserId) -> Result<Vec<Deposit>> {
        within(self.shared.config.call_timeout, "approved_by_owner", async {
            let mut session = self.shared.store.acquire().await?;
            Ok(session
                .deposits_by_owner_and_status(owner, DepositStatus::Approved)
                .await?)
        })
        .await
    }

    /// Sum of principal across approved deposits.
    pub async fn total_approved_amount(&self) -> Result<Decimal> {
        within(self.shared.config.call_timeout, "total_approved", async {
            let mut session = self.shared.store.acquire().await?;
            Ok(session.total_approved_amount().await?)
        })
        .await
    }

    async fn by_status(&self, status: DepositStatus) -> Result<Vec<Deposit>> {
        within(self.shared.config.call_timeout, "deposits_by_status", async {
            let mut session = self.shared.store.acquire().await?;
            Ok(session.deposits_by_status(status).await?)
        })
        .await
    }

    /// Tariffs are resolved before any transaction opens.
    async fn resolve_terms(&self, policy: ApprovalPolicy) -> Result<DepositTerms> {
        match policy {
            ApprovalPolicy::Explicit(terms) => Ok(terms),
            ApprovalPolicy::ByTariff(tariff_id) => self.tariffs.resolve(tariff_id).await,
        }
    }
}

fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount > Decimal::ZERO {
        Ok(())
    } else {
        Err(LedgerError::InvalidArgument(format!(
            "deposit amount must be positive, got {amount}"
        )))
    }
}

/// The error for a guarded write that matched nothing, carrying the status
/// the deposit holds now.
async fn changed_concurrently<Q: Queries>(session: &mut Q, id: DepositId) -> LedgerError {
    match session.deposit(id).await {
        Ok(Some(current)) => already_processed(&current),
        Ok(None) => LedgerError::not_found(entity::DEPOSIT, id),
        Err(e) => e.into(),
    }
}

fn already_processed(deposit: &Deposit) -> LedgerError {
    LedgerError::AlreadyProcessed {
        entity: entity::DEPOSIT,
        id: deposit.id.to_string(),
        status: deposit.status.to_string(),
    }
}
