//! Deposit records and their lifecycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::UnknownVariant;
use crate::{DepositId, UserId};

/// A principal sum placed by a user.
///
/// Pending deposits never carry terms; approved and closed deposits always do.
/// The pairing is enforced by `terms` being a single optional value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    /// Deposit identifier.
    pub id: DepositId,

    /// Owning user.
    pub owner: UserId,

    /// Principal amount, always positive.
    pub amount: Decimal,

    /// Lifecycle status.
    pub status: DepositStatus,

    /// When the deposit was requested (or backdated by an admin).
    pub created_at: DateTime<Utc>,

    /// When the deposit was approved.
    pub approved_at: Option<DateTime<Utc>>,

    /// Lock and reward terms, set on approval.
    pub terms: Option<DepositTerms>,
}

impl Deposit {
    /// A freshly requested deposit awaiting operator approval.
    #[must_use]
    pub fn pending(owner: UserId, amount: Decimal, created_at: DateTime<Utc>) -> Self {
        Self {
            id: DepositId::generate(),
            owner,
            amount,
            status: DepositStatus::Pending,
            created_at,
            approved_at: None,
            terms: None,
        }
    }

    /// A deposit that enters the ledger already approved (admin backfill).
    #[must_use]
    pub fn approved(
        owner: UserId,
        amount: Decimal,
        created_at: DateTime<Utc>,
        approved_at: DateTime<Utc>,
        terms: DepositTerms,
    ) -> Self {
        Self {
            id: DepositId::generate(),
            owner,
            amount,
            status: DepositStatus::Approved,
            created_at,
            approved_at: Some(approved_at),
            terms: Some(terms),
        }
    }

    /// The daily reward rate, if the deposit has been approved.
    #[must_use]
    pub fn daily_rate(&self) -> Option<Decimal> {
        self.terms.as_ref().map(|t| t.daily_rate)
    }

    /// The lock-until timestamp, if the deposit has been approved.
    #[must_use]
    pub fn lock_until(&self) -> Option<DateTime<Utc>> {
        self.terms.as_ref().map(|t| t.lock_until)
    }

    /// Whether the periodic accrual should touch this deposit.
    ///
    /// Deposits approved with a zero rate are exempt.
    #[must_use]
    pub fn is_accruing(&self) -> bool {
        self.status == DepositStatus::Approved
            && self.daily_rate().is_some_and(|rate| rate > Decimal::ZERO)
    }
}

/// Terms fixed at approval time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositTerms {
    /// The principal stays locked until this instant.
    pub lock_until: DateTime<Utc>,

    /// Fraction of the principal accrued per whole day (0.001 = 0.1 %/day).
    pub daily_rate: Decimal,
}

/// Deposit lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    /// Requested, awaiting operator approval.
    Pending,

    /// Active and accruing.
    Approved,

    /// Closed; the paired reward stays withdrawable.
    Closed,
}

impl DepositStatus {
    /// The storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "closed" => Ok(Self::Closed),
            other => Err(UnknownVariant {
                kind: "deposit status",
                value: other.to_string(),
            }),
        }
    }
}
