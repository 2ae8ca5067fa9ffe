//! Storage layer for harvest.
//!
//! Ledger logic is written once against [`Queries`], the storage capability.
//! A [`Store`] hands out sessions of two flavours through two constructors:
//!
//! - [`Store::acquire`]: a pooled session; every statement commits on its own.
//! - [`Store::begin`]: a transaction-scoped session; nothing is visible to other
//!   sessions until [`Queries::commit`], and dropping it rolls everything back.
//!
//! The `*_for_update` reads take a row lock inside a transaction. Outside a
//! transaction they behave like plain reads.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL through `sqlx`, `NUMERIC` money columns.
//! - [`MemoryStore`]: in-process tables behind an async mutex. A transaction
//!   holds the mutex until it finishes, so transactions are serialized.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::{Result, StoreError};
pub use memory::{FailPoint, MemorySession, MemoryStore};
pub use postgres::{PgSession, PgStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use harvest_core::{
    Deposit, DepositId, DepositStatus, DepositTerms, Resolution, Reward, RewardId, Tariff,
    TariffId, UserId, Withdrawal, WithdrawalId, WithdrawalStatus,
};

/// Entity names used in `NotFound` errors.
pub mod entity {
    /// Deposit rows.
    pub const DEPOSIT: &str = "deposit";
    /// Reward rows.
    pub const REWARD: &str = "reward";
    /// Withdrawal rows.
    pub const WITHDRAWAL: &str = "withdrawal";
    /// Tariff rows.
    pub const TARIFF: &str = "tariff";
}

/// A source of storage sessions.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// The session type shared by pooled and transactional access.
    type Session: Queries;

    /// Borrow a pooled session.
    async fn acquire(&self) -> Result<Self::Session>;

    /// Start a transaction.
    async fn begin(&self) -> Result<Self::Session>;
}

/// Every statement the ledgers issue.
///
/// List queries return rows newest first. Conditional writes return `false`
/// when their guard did not match and nothing was written.
#[async_trait]
pub trait Queries: Send {
    // =========================================================================
    // Deposits
    // =========================================================================

    /// Insert a deposit in whatever state it carries.
    async fn insert_deposit(&mut self, deposit: &Deposit) -> Result<()>;

    /// Get a deposit by ID.
    async fn deposit(&mut self, id: DepositId) -> Result<Option<Deposit>>;

    /// Get a deposit by ID, locking the row.
    async fn deposit_for_update(&mut self, id: DepositId) -> Result<Option<Deposit>>;

    /// Move a pending deposit to approved with the given terms.
    async fn approve_deposit(
        &mut self,
        id: DepositId,
        approved_at: DateTime<Utc>,
        terms: DepositTerms,
    ) -> Result<bool>;

    /// Change a deposit's status if it is currently `from`.
    async fn transition_deposit(
        &mut self,
        id: DepositId,
        from: DepositStatus,
        to: DepositStatus,
    ) -> Result<bool>;

    /// Hard-delete a deposit.
    async fn delete_deposit(&mut self, id: DepositId) -> Result<bool>;

    /// All deposits of one owner.
    async fn deposits_by_owner(&mut self, owner: UserId) -> Result<Vec<Deposit>>;

    /// All deposits in one status.
    async fn deposits_by_status(&mut self, status: DepositStatus) -> Result<Vec<Deposit>>;

    /// One owner's deposits in one status.
    async fn deposits_by_owner_and_status(
        &mut self,
        owner: UserId,
        status: DepositStatus,
    ) -> Result<Vec<Deposit>>;

    /// Sum of principal across approved deposits.
    async fn total_approved_amount(&mut self) -> Result<Decimal>;

    // =========================================================================
    // Rewards
    // =========================================================================

    /// Insert a reward.
    async fn insert_reward(&mut self, reward: &Reward) -> Result<()>;

    /// Get a reward by ID.
    async fn reward(&mut self, id: RewardId) -> Result<Option<Reward>>;

    /// Get a reward by ID, locking the row.
    async fn reward_for_update(&mut self, id: RewardId) -> Result<Option<Reward>>;

    /// Get the reward paired with a deposit, locking the row.
    async fn reward_by_deposit_for_update(&mut self, deposit_id: DepositId)
        -> Result<Option<Reward>>;

    /// Get the reward paired with a deposit.
    async fn reward_by_deposit(&mut self, deposit_id: DepositId) -> Result<Option<Reward>>;

    /// All rewards of one owner.
    async fn rewards_by_owner(&mut self, owner: UserId) -> Result<Vec<Reward>>;

    /// Rewards paired with any of the given deposits.
    async fn rewards_by_deposits(&mut self, deposit_ids: &[DepositId]) -> Result<Vec<Reward>>;

    /// Add `delta` to the accrued total and move the accrual anchor.
    ///
    /// Fails with `NotFound` if the reward does not exist.
    async fn add_accrued(
        &mut self,
        id: RewardId,
        delta: Decimal,
        last_accrued_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Add `delta` to the withdrawn total if the available balance covers it.
    async fn add_withdrawn(&mut self, id: RewardId, delta: Decimal) -> Result<bool>;

    /// Sum of `accrued - withdrawn` across all rewards.
    async fn total_available(&mut self) -> Result<Decimal>;

    // =========================================================================
    // Withdrawals
    // =========================================================================

    /// Insert a withdrawal request.
    async fn insert_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<()>;

    /// Get a withdrawal by ID.
    async fn withdrawal(&mut self, id: WithdrawalId) -> Result<Option<Withdrawal>>;

    /// Get a withdrawal by ID, locking the row.
    async fn withdrawal_for_update(&mut self, id: WithdrawalId) -> Result<Option<Withdrawal>>;

    /// Resolve a withdrawal if it is still pending.
    async fn resolve_withdrawal(&mut self, id: WithdrawalId, resolution: &Resolution)
        -> Result<bool>;

    /// All withdrawals of one owner.
    async fn withdrawals_by_owner(&mut self, owner: UserId) -> Result<Vec<Withdrawal>>;

    /// Every withdrawal.
    async fn all_withdrawals(&mut self) -> Result<Vec<Withdrawal>>;

    /// All withdrawals in one status.
    async fn withdrawals_by_status(&mut self, status: WithdrawalStatus)
        -> Result<Vec<Withdrawal>>;

    // =========================================================================
    // Tariffs
    // =========================================================================

    /// Insert a tariff (catalog seeding).
    async fn insert_tariff(&mut self, tariff: &Tariff) -> Result<()>;

    /// Get a tariff by ID.
    async fn tariff(&mut self, id: TariffId) -> Result<Option<Tariff>>;

    /// Every tariff, by name.
    async fn tariffs(&mut self) -> Result<Vec<Tariff>>;

    // =========================================================================
    // Session
    // =========================================================================

    /// Make the session's writes durable. A no-op for pooled sessions.
    async fn commit(self) -> Result<()>
    where
        Self: Sized;
}
