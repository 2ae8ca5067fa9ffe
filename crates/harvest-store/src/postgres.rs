//! PostgreSQL storage implementation.
//!
//! Money columns are `NUMERIC` and map to `Decimal`. Ledger identifiers are
//! ULIDs stored in `UUID` columns.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres};
use uuid::Uuid;

use harvest_core::{
    Deposit, DepositId, DepositStatus, DepositTerms, Resolution, Reward, RewardId, Tariff,
    TariffId, UserId, Withdrawal, WithdrawalId, WithdrawalStatus,
};

use crate::error::{Result, StoreError};
use crate::{entity, Queries, Store};

const DEPOSIT_COLUMNS: &str =
    "id, owner_id, amount, status, created_at, approved_at, lock_until, daily_rate";

const REWARD_COLUMNS: &str =
    "id, owner_id, deposit_id, kind, accrued, withdrawn, last_accrued_at, created_at";

const WITHDRAWAL_COLUMNS: &str =
    "id, owner_id, reward_id, amount, status, created_at, approved_at, rejected_at, reason";

const TARIFF_COLUMNS: &str = "id, name, lock_until, daily_rate, created_at";

/// PostgreSQL-backed storage.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a pool to the given database URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    type Session = PgSession;

    async fn acquire(&self) -> Result<PgSession> {
        Ok(PgSession::Pooled(self.pool.acquire().await?))
    }

    async fn begin(&self) -> Result<PgSession> {
        Ok(PgSession::Transaction(self.pool.begin().await?))
    }
}

/// A session on a [`PgStore`]: a pooled connection or an open transaction.
///
/// Dropping an uncommitted transaction rolls it back.
pub enum PgSession {
    /// A connection checked out of the pool.
    Pooled(PoolConnection<Postgres>),
    /// An open transaction.
    Transaction(sqlx::Transaction<'static, Postgres>),
}

impl PgSession {
    fn conn(&mut self) -> &mut PgConnection {
        match self {
            Self::Pooled(conn) => &mut **conn,
            Self::Transaction(tx) => &mut **tx,
        }
    }
}

// ============================================================================
// Row mapping
// ============================================================================

#[derive(sqlx::FromRow)]
struct DepositRow {
    id: Uuid,
    owner_id: Uuid,
    amount: Decimal,
    status: String,
    created_at: DateTime<Utc>,
    approved_at: Option<DateTime<Utc>>,
    lock_until: Option<DateTime<Utc>>,
    daily_rate: Option<Decimal>,
}

impl TryFrom<DepositRow> for Deposit {
    type Error = StoreError;

    fn try_from(row: DepositRow) -> Result<Self> {
        let terms = match (row.lock_until, row.daily_rate) {
            (Some(lock_until), Some(daily_rate)) => Some(DepositTerms {
                lock_until,
                daily_rate,
            }),
            (None, None) => None,
            _ => {
                return Err(StoreError::Serialization(format!(
                    "deposit {} has half of its terms",
                    row.id
                )))
            }
        };

        Ok(Self {
            id: DepositId::from_uuid(row.id),
            owner: UserId::from_uuid(row.owner_id),
            amount: row.amount,
            status: row
                .status
                .parse()
                .map_err(|e| StoreError::Serialization(format!("{e}")))?,
            created_at: row.created_at,
            approved_at: row.approved_at,
            terms,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RewardRow {
    id: Uuid,
    owner_id: Uuid,
    deposit_id: Option<Uuid>,
    kind: String,
    accrued: Decimal,
    withdrawn: Decimal,
    last_accrued_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RewardRow> for Reward {
    type Error = StoreError;

    fn try_from(row: RewardRow) -> Result<Self> {
        Ok(Self {
            id: RewardId::from_uuid(row.id),
            owner: UserId::from_uuid(row.owner_id),
            deposit_id: row.deposit_id.map(DepositId::from_uuid),
            kind: row
                .kind
                .parse()
                .map_err(|e| StoreError::Serialization(format!("{e}")))?,
            accrued: row.accrued,
            withdrawn: row.withdrawn,
            last_accrued_at: row.last_accrued_at,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WithdrawalRow {
    id: Uuid,
    owner_id: Uuid,
    reward_id: Uuid,
    amount: Decimal,
    status: String,
    created_at: DateTime<Utc>,
    approved_at: Option<DateTime<Utc>>,
    rejected_at: Option<DateTime<Utc>>,
    reason: Option<String>,
}

impl TryFrom<WithdrawalRow> for Withdrawal {
    type Error = StoreError;

    fn try_from(row: WithdrawalRow) -> Result<Self> {
        Ok(Self {
            id: WithdrawalId::from_uuid(row.id),
            owner: UserId::from_uuid(row.owner_id),
            reward_id: RewardId::from_uuid(row.reward_id),
            amount: row.amount,
            status: row
                .status
                .parse()
                .map_err(|e| StoreError::Serialization(format!("{e}")))?,
            created_at: row.created_at,
            approved_at: row.approved_at,
            rejected_at: row.rejected_at,
            reason: row.reason,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TariffRow {
    id: Uuid,
    name: String,
    lock_until: Option<DateTime<Utc>>,
    daily_rate: Option<Decimal>,
    created_at: DateTime<Utc>,
}

impl From<TariffRow> for Tariff {
    fn from(row: TariffRow) -> Self {
        Self {
            id: TariffId::from_uuid(row.id),
            name: row.name,
            lock_until: row.lock_until,
            daily_rate: row.daily_rate,
            created_at: row.created_at,
        }
    }
}

fn map_rows<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ============================================================================
// Queries
// ============================================================================

impl PgSession {
    async fn fetch_deposit(&mut self, id: DepositId, lock: bool) -> Result<Option<Deposit>> {
        let sql = format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE id = $1{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        sqlx::query_as::<_, DepositRow>(&sql)
            .bind(id.to_uuid())
            .fetch_optional(self.conn())
            .await?
            .map(Deposit::try_from)
            .transpose()
    }

    async fn fetch_reward(&mut self, column: &str, id: Uuid, lock: bool) -> Result<Option<Reward>> {
        let sql = format!(
            "SELECT {REWARD_COLUMNS} FROM rewards WHERE {column} = $1{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        sqlx::query_as::<_, RewardRow>(&sql)
            .bind(id)
            .fetch_optional(self.conn())
            .await?
            .map(Reward::try_from)
            .transpose()
    }

    async fn fetch_withdrawal(
        &mut self,
        id: WithdrawalId,
        lock: bool,
    ) -> Result<Option<Withdrawal>> {
        let sql = format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = $1{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        sqlx::query_as::<_, WithdrawalRow>(&sql)
            .bind(id.to_uuid())
            .fetch_optional(self.conn())
            .await?
            .map(Withdrawal::try_from)
            .transpose()
    }
}

#[async_trait]
impl Queries for PgSession {
    async fn insert_deposit(&mut self, deposit: &Deposit) -> Result<()> {
        sqlx::query(
            "INSERT INTO deposits (id, owner_id, amount, status, created_at, approved_at, lock_until, daily_rate) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(deposit.id.to_uuid())
        .bind(*deposit.owner.as_uuid())
        .bind(deposit.amount)
        .bind(deposit.status.as_str())
        .bind(deposit.created_at)
        .bind(deposit.approved_at)
        .bind(deposit.lock_until())
        .bind(deposit.daily_rate())
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn deposit(&mut self, id: DepositId) -> Result<Option<Deposit>> {
        self.fetch_deposit(id, false).await
    }

    async fn deposit_for_update(&mut self, id: DepositId) -> Result<Option<Deposit>> {
        self.fetch_deposit(id, true).await
    }

    async fn approve_deposit(
        &mut self,
        id: DepositId,
        approved_at: DateTime<Utc>,
        terms: DepositTerms,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE deposits SET status = 'approved', approved_at = $2, lock_until = $3, daily_rate = $4 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id.to_uuid())
        .bind(approved_at)
        .bind(terms.lock_until)
        .bind(terms.daily_rate)
        .execute(self.conn())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn transition_deposit(
        &mut self,
        id: DepositId,
        from: DepositStatus,
        to: DepositStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE deposits SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id.to_uuid())
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(self.conn())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_deposit(&mut self, id: DepositId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM deposits WHERE id = $1")
            .bind(id.to_uuid())
            .execute(self.conn())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn deposits_by_owner(&mut self, owner: UserId) -> Result<Vec<Deposit>> {
        let sql = format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE owner_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, DepositRow>(&sql)
            .bind(*owner.as_uuid())
            .fetch_all(self.conn())
            .await?;
        map_rows(rows)
    }

    async fn deposits_by_status(&mut self, status: DepositStatus) -> Result<Vec<Deposit>> {
        let sql = format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE status = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, DepositRow>(&sql)
            .bind(status.as_str())
            .fetch_all(self.conn())
            .await?;
        map_rows(rows)
    }

    async fn deposits_by_owner_and_status(
        &mut self,
        owner: UserId,
        status: DepositStatus,
    ) -> Result<Vec<Deposit>> {
        let sql = format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE owner_id = $1 AND status = $2 \
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, DepositRow>(&sql)
            .bind(*owner.as_uuid())
            .bind(status.as_str())
            .fetch_all(self.conn())
            .await?;
        map_rows(rows)
    }

    async fn total_approved_amount(&mut self) -> Result<Decimal> {
        let total = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(amount), 0) FROM deposits WHERE status = 'approved'",
        )
        .fetch_one(self.conn())
        .await?;
        Ok(total)
    }

    async fn insert_reward(&mut self, reward: &Reward) -> Result<()> {
        sqlx::query(
            "INSERT INTO rewards (id, owner_id, deposit_id, kind, accrued, withdrawn, last_accrued_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(reward.id.to_uuid())
        .bind(*reward.owner.as_uuid())
        .bind(reward.deposit_id.map(|id| id.to_uuid()))
        .bind(reward.kind.as_str())
        .bind(reward.accrued)
        .bind(reward.withdrawn)
        .bind(reward.last_accrued_at)
        .bind(reward.created_at)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn reward(&mut self, id: RewardId) -> Result<Option<Reward>> {
        self.fetch_reward("id", id.to_uuid(), false).await
    }

    async fn reward_for_update(&mut self, id: RewardId) -> Result<Option<Reward>> {
        self.fetch_reward("id", id.to_uuid(), true).await
    }

    async fn reward_by_deposit_for_update(
        &mut self,
        deposit_id: DepositId,
    ) -> Result<Option<Reward>> {
        self.fetch_reward("deposit_id", deposit_id.to_uuid(), true)
            .await
    }

    async fn reward_by_deposit(&mut self, deposit_id: DepositId) -> Result<Option<Reward>> {
        self.fetch_reward("deposit_id", deposit_id.to_uuid(), false)
            .await
    }

    async fn rewards_by_owner(&mut self, owner: UserId) -> Result<Vec<Reward>> {
        let sql = format!(
            "SELECT {REWARD_COLUMNS} FROM rewards WHERE owner_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, RewardRow>(&sql)
            .bind(*owner.as_uuid())
            .fetch_all(self.conn())
            .await?;
        map_rows(rows)
    }

    async fn rewards_by_deposits(&mut self, deposit_ids: &[DepositId]) -> Result<Vec<Reward>> {
        if deposit_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = deposit_ids.iter().map(DepositId::to_uuid).collect();
        let sql = format!(
            "SELECT {REWARD_COLUMNS} FROM rewards WHERE deposit_id = ANY($1) ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, RewardRow>(&sql)
            .bind(ids)
            .fetch_all(self.conn())
            .await?;
        map_rows(rows)
    }

    async fn add_accrued(
        &mut self,
        id: RewardId,
        delta: Decimal,
        last_accrued_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE rewards SET accrued = accrued + $2, last_accrued_at = $3 WHERE id = $1",
        )
        .bind(id.to_uuid())
        .bind(delta)
        .bind(last_accrued_at)
        .execute(self.conn())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(entity::REWARD, id));
        }
        Ok(())
    }

    async fn add_withdrawn(&mut self, id: RewardId, delta: Decimal) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE rewards SET withdrawn = withdrawn + $2 \
             WHERE id = $1 AND accrued - withdrawn >= $2",
        )
        .bind(id.to_uuid())
        .bind(delta)
        .execute(self.conn())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn total_available(&mut self) -> Result<Decimal> {
        let total = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(accrued - withdrawn), 0) FROM rewards",
        )
        .fetch_one(self.conn())
        .await?;
        Ok(total)
    }

    async fn insert_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<()> {
        sqlx::query(
            "INSERT INTO withdrawals (id, owner_id, reward_id, amount, status, created_at, approved_at, rejected_at, reason) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(withdrawal.id.to_uuid())
        .bind(*withdrawal.owner.as_uuid())
        .bind(withdrawal.reward_id.to_uuid())
        .bind(withdrawal.amount)
        .bind(withdrawal.status.as_str())
        .bind(withdrawal.created_at)
        .bind(withdrawal.approved_at)
        .bind(withdrawal.rejected_at)
        .bind(withdrawal.reason.as_deref())
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn withdrawal(&mut self, id: WithdrawalId) -> Result<Option<Withdrawal>> {
        self.fetch_withdrawal(id, false).await
    }

    async fn withdrawal_for_update(&mut self, id: WithdrawalId) -> Result<Option<Withdrawal>> {
        self.fetch_withdrawal(id, true).await
    }

    async fn resolve_withdrawal(
        &mut self,
        id: WithdrawalId,
        resolution: &Resolution,
    ) -> Result<bool> {
        let (approved_at, rejected_at, reason) = match resolution {
            Resolution::Approved { at } => (Some(*at), None, None),
            Resolution::Rejected { at, reason } => (None, Some(*at), Some(reason.as_str())),
        };
        let result = sqlx::query(
            "UPDATE withdrawals SET status = $2, approved_at = $3, rejected_at = $4, reason = $5 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id.to_uuid())
        .bind(resolution.status().as_str())
        .bind(approved_at)
        .bind(rejected_at)
        .bind(reason)
        .execute(self.conn())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn withdrawals_by_owner(&mut self, owner: UserId) -> Result<Vec<Withdrawal>> {
        let sql = format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE owner_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, WithdrawalRow>(&sql)
            .bind(*owner.as_uuid())
            .fetch_all(self.conn())
            .await?;
        map_rows(rows)
    }

    async fn all_withdrawals(&mut self) -> Result<Vec<Withdrawal>> {
        let sql = format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals ORDER BY created_at DESC");
        let rows = sqlx::query_as::<_, WithdrawalRow>(&sql)
            .fetch_all(self.conn())
            .await?;
        map_rows(rows)
    }

    async fn withdrawals_by_status(
        &mut self,
        status: WithdrawalStatus,
    ) -> Result<Vec<Withdrawal>> {
        let sql = format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE status = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, WithdrawalRow>(&sql)
            .bind(status.as_str())
            .fetch_all(self.conn())
            .await?;
        map_rows(rows)
    }

    async fn insert_tariff(&mut self, tariff: &Tariff) -> Result<()> {
        sqlx::query(
            "INSERT INTO tariffs (id, name, lock_until, daily_rate, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(*tariff.id.as_uuid())
        .bind(&tariff.name)
        .bind(tariff.lock_until)
        .bind(tariff.daily_rate)
        .bind(tariff.created_at)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn tariff(&mut self, id: TariffId) -> Result<Option<Tariff>> {
        let sql = format!("SELECT {TARIFF_COLUMNS} FROM tariffs WHERE id = $1");
        let row = sqlx::query_as::<_, TariffRow>(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(self.conn())
            .await?;
        Ok(row.map(Tariff::from))
    }

    async fn tariffs(&mut self) -> Result<Vec<Tariff>> {
        let sql = format!("SELECT {TARIFF_COLUMNS} FROM tariffs ORDER BY name");
        let rows = sqlx::query_as::<_, TariffRow>(&sql)
            .fetch_all(self.conn())
            .await?;
        Ok(rows.into_iter().map(Tariff::from).collect())
    }

    async fn commit(self) -> Result<()> {
        if let Self::Transaction(tx) = self {
            tx.commit().await?;
        }
        Ok(())
    }
}
