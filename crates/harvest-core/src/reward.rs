//! Reward records: accrued versus withdrawn balances.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::UnknownVariant;
use crate::{Deposit, DepositId, RewardId, UserId};

/// The accruing balance tied to a deposit, or a standalone referral bonus.
///
/// `withdrawn <= accrued` holds at all times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    /// Reward identifier.
    pub id: RewardId,

    /// Owning user.
    pub owner: UserId,

    /// The deposit this reward accrues for; `None` for referral rewards.
    pub deposit_id: Option<DepositId>,

    /// What kind of reward this is.
    pub kind: RewardKind,

    /// Cumulative accrued amount.
    pub accrued: Decimal,

    /// Cumulative withdrawn amount.
    pub withdrawn: Decimal,

    /// The day boundary the accrual clock is anchored to.
    pub last_accrued_at: Option<DateTime<Utc>>,

    /// When the reward row was created.
    pub created_at: DateTime<Utc>,
}

impl Reward {
    /// The reward row paired with a deposit at approval time.
    #[must_use]
    pub fn for_deposit(deposit: &Deposit, initial_amount: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            id: RewardId::generate(),
            owner: deposit.owner,
            deposit_id: Some(deposit.id),
            kind: RewardKind::DepositAccrual,
            accrued: initial_amount,
            withdrawn: Decimal::ZERO,
            last_accrued_at: None,
            created_at: now,
        }
    }

    /// A referral bonus with no deposit behind it.
    #[must_use]
    pub fn referral(owner: UserId, amount: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            id: RewardId::generate(),
            owner,
            deposit_id: None,
            kind: RewardKind::Referral,
            accrued: amount,
            withdrawn: Decimal::ZERO,
            last_accrued_at: None,
            created_at: now,
        }
    }

    /// Accrued minus withdrawn; the withdrawal ceiling.
    #[must_use]
    pub fn available(&self) -> Decimal {
        self.accrued - self.withdrawn
    }

    /// Whether `amount` can be withdrawn right now.
    #[must_use]
    pub fn covers(&self, amount: Decimal) -> bool {
        self.available() >= amount
    }
}

/// Reward kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    /// Daily accrual on a deposit.
    DepositAccrual,

    /// Ad-hoc referral bonus.
    Referral,
}

impl RewardKind {
    /// The storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DepositAccrual => "deposit",
            Self::Referral => "referral",
        }
    }
}

impl fmt::Display for RewardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RewardKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::DepositAccrual),
            "referral" => Ok(Self::Referral),
            other => Err(UnknownVariant {
                kind: "reward kind",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn available_is_accrued_minus_withdrawn() {
        let mut reward = Reward::referral(UserId::generate(), dec!(50), Utc::now());
        reward.withdrawn = dec!(20.5);
        assert_eq!(reward.available(), dec!(29.5));
        assert!(reward.covers(dec!(29.5)));
        assert!(!reward.covers(dec!(29.51)));
    }

    #[test]
    fn deposit_reward_links_owner_and_deposit() {
        let deposit = Deposit::pending(UserId::generate(), dec!(1000), Utc::now());
        let reward = Reward::for_deposit(&deposit, dec!(1000), Utc::now());
        assert_eq!(reward.owner, deposit.owner);
        assert_eq!(reward.deposit_id, Some(deposit.id));
        assert_eq!(reward.kind, RewardKind::DepositAccrual);
        assert!(reward.last_accrued_at.is_none());
    }

    #[test]
    fn kind_storage_form() {
        assert_eq!("deposit".parse::<RewardKind>(), Ok(RewardKind::DepositAccrual));
        assert_eq!(RewardKind::Referral.as_str(), "referral");
    }
}
