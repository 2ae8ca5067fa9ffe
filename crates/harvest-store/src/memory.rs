//! In-memory storage implementation.
//!
//! Tables live behind a `tokio` mutex. Pooled sessions lock it per statement;
//! a transaction locks it for its whole lifetime and works on a private copy
//! that replaces the shared tables on commit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use harvest_core::{
    Deposit, DepositId, DepositStatus, DepositTerms, Resolution, Reward, RewardId, Tariff,
    TariffId, UserId, Withdrawal, WithdrawalId, WithdrawalStatus,
};

use crate::error::{Result, StoreError};
use crate::{entity, Queries, Store};

/// A statement that can be made to fail once, for exercising rollback paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// The next `insert_reward`.
    InsertReward,
    /// The next `add_withdrawn`.
    AddWithdrawn,
    /// The next `add_accrued`.
    AddAccrued,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    deposits: HashMap<DepositId, Deposit>,
    rewards: HashMap<RewardId, Reward>,
    withdrawals: HashMap<WithdrawalId, Withdrawal>,
    tariffs: HashMap<TariffId, Tariff>,
}

/// In-memory storage, cheap to clone; clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    failpoints: Arc<StdMutex<Vec<FailPoint>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next statement of the given kind fail with a database error.
    pub fn fail_next(&self, point: FailPoint) {
        if let Ok(mut points) = self.failpoints.lock() {
            points.push(point);
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Session = MemorySession;

    async fn acquire(&self) -> Result<MemorySession> {
        Ok(MemorySession {
            mode: Mode::Pooled(Arc::clone(&self.tables)),
            failpoints: Arc::clone(&self.failpoints),
        })
    }

    async fn begin(&self) -> Result<MemorySession> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let work = guard.clone();
        Ok(MemorySession {
            mode: Mode::Transaction { guard, work },
            failpoints: Arc::clone(&self.failpoints),
        })
    }
}

enum Mode {
    Pooled(Arc<Mutex<Tables>>),
    Transaction {
        guard: OwnedMutexGuard<Tables>,
        work: Tables,
    },
}

/// A session on a [`MemoryStore`].
pub struct MemorySession {
    mode: Mode,
    failpoints: Arc<StdMutex<Vec<FailPoint>>>,
}

impl MemorySession {
    async fn with<R>(&mut self, f: impl FnOnce(&mut Tables) -> R + Send) -> R {
        match &mut self.mode {
            Mode::Pooled(tables) => {
                let mut tables = tables.lock().await;
                f(&mut *tables)
            }
            Mode::Transaction { work, .. } => f(work),
        }
    }

    fn trip(&self, point: FailPoint) -> Result<()> {
        let Ok(mut points) = self.failpoints.lock() else {
            return Ok(());
        };
        if let Some(pos) = points.iter().position(|p| *p == point) {
            points.remove(pos);
            return Err(StoreError::Database(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

fn numeric_overflow(column: &str) -> StoreError {
    StoreError::Database(format!("numeric field overflow in {column}"))
}

fn checked_sum(mut amounts: impl Iterator<Item = Decimal>, column: &str) -> Result<Decimal> {
    amounts
        .try_fold(Decimal::ZERO, Decimal::checked_add)
        .ok_or_else(|| numeric_overflow(column))
}

fn newest_first<T>(mut rows: Vec<T>, created_at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    rows.sort_by_key(|row| std::cmp::Reverse(created_at(row)));
    rows
}

fn deposits_where(tables: &Tables, pred: impl Fn(&Deposit) -> bool) -> Vec<Deposit> {
    let rows = tables.deposits.values().filter(|d| pred(d)).cloned().collect();
    newest_first(rows, |d: &Deposit| d.created_at)
}

fn rewards_where(tables: &Tables, pred: impl Fn(&Reward) -> bool) -> Vec<Reward> {
    let rows = tables.rewards.values().filter(|r| pred(r)).cloned().collect();
    newest_first(rows, |r: &Reward| r.created_at)
}

fn withdrawals_where(tables: &Tables, pred: impl Fn(&Withdrawal) -> bool) -> Vec<Withdrawal> {
    let rows = tables.withdrawals.values().filter(|w| pred(w)).cloned().collect();
    newest_first(rows, |w: &Withdrawal| w.created_at)
}

#[async_trait]
impl Queries for MemorySession {
    async fn insert_deposit(&mut self, deposit: &Deposit) -> Result<()> {
        let deposit = deposit.clone();
        self.with(move |t| {
            if t.deposits.contains_key(&deposit.id) {
                return Err(StoreError::Conflict(format!("deposit {} exists", deposit.id)));
            }
            t.deposits.insert(deposit.id, deposit);
            Ok(())
        })
        .await
    }

    async fn deposit(&mut self, id: DepositId) -> Result<Option<Deposit>> {
        Ok(self.with(|t| t.deposits.get(&id).cloned()).await)
    }

    async fn deposit_for_update(&mut self, id: DepositId) -> Result<Option<Deposit>> {
        self.deposit(id).await
    }

    async fn approve_deposit(
        &mut self,
        id: DepositId,
        approved_at: DateTime<Utc>,
        terms: DepositTerms,
    ) -> Result<bool> {
        Ok(self
            .with(|t| match t.deposits.get_mut(&id) {
                Some(d) if d.status == DepositStatus::Pending => {
                    d.status = DepositStatus::Approved;
                    d.approved_at = Some(approved_at);
                    d.terms = Some(terms);
                    true
                }
                _ => false,
            })
            .await)
    }

    async fn transition_deposit(
        &mut self,
        id: DepositId,
        from: DepositStatus,
        to: DepositStatus,
    ) -> Result<bool> {
        Ok(self
            .with(|t| match t.deposits.get_mut(&id) {
                Some(d) if d.status == from => {
                    d.status = to;
                    true
                }
                _ => false,
            })
            .await)
    }

    async fn delete_deposit(&mut self, id: DepositId) -> Result<bool> {
        Ok(self.with(|t| t.deposits.remove(&id).is_some()).await)
    }

    async fn deposits_by_owner(&mut self, owner: UserId) -> Result<Vec<Deposit>> {
        Ok(self.with(|t| deposits_where(t, |d| d.owner == owner)).await)
    }

    async fn deposits_by_status(&mut self, status: DepositStatus) -> Result<Vec<Deposit>> {
        Ok(self.with(|t| deposits_where(t, |d| d.status == status)).await)
    }

    async fn deposits_by_owner_and_status(
        &mut self,
        owner: UserId,
        status: DepositStatus,
    ) -> Result<Vec<Deposit>> {
        Ok(self
            .with(|t| deposits_where(t, |d| d.owner == owner && d.status == status))
            .await)
    }

    async fn total_approved_amount(&mut self) -> Result<Decimal> {
        self.with(|t| {
            checked_sum(
                t.deposits
                    .values()
                    .filter(|d| d.status == DepositStatus::Approved)
                    .map(|d| d.amount),
                "deposits.amount",
            )
        })
        .await
    }

    async fn insert_reward(&mut self, reward: &Reward) -> Result<()> {
        self.trip(FailPoint::InsertReward)?;
        let reward = reward.clone();
        self.with(move |t| {
            if t.rewards.contains_key(&reward.id) {
                return Err(StoreError::Conflict(format!("reward {} exists", reward.id)));
            }
            if let Some(deposit_id) = reward.deposit_id {
                if t.rewards.values().any(|r| r.deposit_id == Some(deposit_id)) {
                    return Err(StoreError::Conflict(format!(
                        "deposit {deposit_id} already has a reward"
                    )));
                }
            }
            t.rewards.insert(reward.id, reward);
            Ok(())
        })
        .await
    }

    async fn reward(&mut self, id: RewardId) -> Result<Option<Reward>> {
        Ok(self.with(|t| t.rewards.get(&id).cloned()).await)
    }

    async fn reward_for_update(&mut self, id: RewardId) -> Result<Option<Reward>> {
        self.reward(id).await
    }

    async fn reward_by_deposit_for_update(
        &mut self,
        deposit_id: DepositId,
    ) -> Result<Option<Reward>> {
        self.reward_by_deposit(deposit_id).await
    }

    async fn reward_by_deposit(&mut self, deposit_id: DepositId) -> Result<Option<Reward>> {
        Ok(self
            .with(|t| {
                t.rewards
                    .values()
                    .find(|r| r.deposit_id == Some(deposit_id))
                    .cloned()
            })
            .await)
    }

    async fn rewards_by_owner(&mut self, owner: UserId) -> Result<Vec<Reward>> {
        Ok(self.with(|t| rewards_where(t, |r| r.owner == owner)).await)
    }

    async fn rewards_by_deposits(&mut self, deposit_ids: &[DepositId]) -> Result<Vec<Reward>> {
        let ids = deposit_ids.to_vec();
        Ok(self
            .with(move |t| rewards_where(t, |r| r.deposit_id.is_some_and(|d| ids.contains(&d))))
            .await)
    }

    async fn add_accrued(
        &mut self,
        id: RewardId,
        delta: Decimal,
        last_accrued_at: DateTime<Utc>,
    ) -> Result<()> {
        self.trip(FailPoint::AddAccrued)?;
        self.with(|t| {
            let reward = t
                .rewards
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found(entity::REWARD, id))?;
            reward.accrued = reward
                .accrued
                .checked_add(delta)
                .ok_or_else(|| numeric_overflow("rewards.accrued"))?;
            reward.last_accrued_at = Some(last_accrued_at);
            Ok(())
        })
        .await
    }

    async fn add_withdrawn(&mut self, id: RewardId, delta: Decimal) -> Result<bool> {
        self.trip(FailPoint::AddWithdrawn)?;
        self.with(|t| match t.rewards.get_mut(&id) {
            Some(r) if r.covers(delta) => {
                r.withdrawn = r
                    .withdrawn
                    .checked_add(delta)
                    .ok_or_else(|| numeric_overflow("rewards.withdrawn"))?;
                Ok(true)
            }
            _ => Ok(false),
        })
        .await
    }

    async fn total_available(&mut self) -> Result<Decimal> {
        self.with(|t| checked_sum(t.rewards.values().map(Reward::available), "rewards.available"))
            .await
    }

    async fn insert_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<()> {
        let withdrawal = withdrawal.clone();
        self.with(move |t| {
            if !t.rewards.contains_key(&withdrawal.reward_id) {
                return Err(StoreError::Database(format!(
                    "withdrawal references missing reward {}",
                    withdrawal.reward_id
                )));
            }
            t.withdrawals.insert(withdrawal.id, withdrawal);
            Ok(())
        })
        .await
    }

    async fn withdrawal(&mut self, id: WithdrawalId) -> Result<Option<Withdrawal>> {
        Ok(self.with(|t| t.withdrawals.get(&id).cloned()).await)
    }

    async fn withdrawal_for_update(&mut self, id: WithdrawalId) -> Result<Option<Withdrawal>> {
        self.withdrawal(id).await
    }

    async fn resolve_withdrawal(
        &mut self,
        id: WithdrawalId,
        resolution: &Resolution,
    ) -> Result<bool> {
        let resolution = resolution.clone();
        Ok(self
            .with(move |t| match t.withdrawals.get_mut(&id) {
                Some(w) if w.status == WithdrawalStatus::Pending => {
                    resolution.apply(w);
                    true
                }
                _ => false,
            })
            .await)
    }

    async fn withdrawals_by_owner(&mut self, owner: UserId) -> Result<Vec<Withdrawal>> {
        Ok(self.with(|t| withdrawals_where(t, |w| w.owner == owner)).await)
    }

    async fn all_withdrawals(&mut self) -> Result<Vec<Withdrawal>> {
        Ok(self.with(|t| withdrawals_where(t, |_| true)).await)
    }

    async fn withdrawals_by_status(
        &mut self,
        status: WithdrawalStatus,
    ) -> Result<Vec<Withdrawal>> {
        Ok(self.with(|t| withdrawals_where(t, |w| w.status == status)).await)
    }

    async fn insert_tariff(&mut self, tariff: &Tariff) -> Result<()> {
        let tariff = tariff.clone();
        self.with(move |t| {
            t.tariffs.insert(tariff.id, tariff);
        })
        .await;
        Ok(())
    }

    async fn tariff(&mut self, id: TariffId) -> Result<Option<Tariff>> {
        Ok(self.with(|t| t.tariffs.get(&id).cloned()).await)
    }

    async fn tariffs(&mut self) -> Result<Vec<Tariff>> {
        Ok(self
            .with(|t| {
                let mut rows: Vec<Tariff> = t.tariffs.values().cloned().collect();
                rows.sort_by(|a, b| a.name.cmp(&b.name));
                rows
            })
            .await)
    }

    async fn commit(self) -> Result<()> {
        if let Mode::Transaction { mut guard, work } = self.mode {
            *guard = work;
        }
        Ok(())
    }
}
