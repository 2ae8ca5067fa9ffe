//! Withdrawal requests against a reward's available balance.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, UnknownVariant};
use crate::{RewardId, UserId, WithdrawalId};

/// A user request to move funds out of a reward.
///
/// Transitions: pending -> approved, pending -> rejected. Both targets are
/// terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    /// Withdrawal identifier.
    pub id: WithdrawalId,

    /// Requesting user.
    pub owner: UserId,

    /// The reward being drawn from.
    pub reward_id: RewardId,

    /// Requested amount.
    pub amount: Decimal,

    /// Current status.
    pub status: WithdrawalStatus,

    /// When the request was made.
    pub created_at: DateTime<Utc>,

    /// When an operator approved it.
    pub approved_at: Option<DateTime<Utc>>,

    /// When an operator rejected it.
    pub rejected_at: Option<DateTime<Utc>>,

    /// Operator-supplied rejection reason.
    pub reason: Option<String>,
}

impl Withdrawal {
    /// A new pending request.
    #[must_use]
    pub fn pending(
        owner: UserId,
        reward_id: RewardId,
        amount: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WithdrawalId::generate(),
            owner,
            reward_id,
            amount,
            status: WithdrawalStatus::Pending,
            created_at,
            approved_at: None,
            rejected_at: None,
            reason: None,
        }
    }

    /// Fail with `AlreadyProcessed` unless the request is still pending.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AlreadyProcessed` for approved or rejected requests.
    pub fn ensure_pending(&self) -> Result<(), LedgerError> {
        if self.status == WithdrawalStatus::Pending {
            Ok(())
        } else {
            Err(LedgerError::AlreadyProcessed {
                entity: "withdrawal",
                id: self.id.to_string(),
                status: self.status.to_string(),
            })
        }
    }
}

/// The outcome written when a pending withdrawal is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Approved at the given instant.
    Approved {
        /// Approval time.
        at: DateTime<Utc>,
    },

    /// Rejected at the given instant for the given reason.
    Rejected {
        /// Rejection time.
        at: DateTime<Utc>,
        /// Operator-supplied reason.
        reason: String,
    },
}

impl Resolution {
    /// The status this resolution moves the withdrawal into.
    #[must_use]
    pub const fn status(&self) -> WithdrawalStatus {
        match self {
            Self::Approved { .. } => WithdrawalStatus::Approved,
            Self::Rejected { .. } => WithdrawalStatus::Rejected,
        }
    }

    /// Apply this resolution to an in-memory record.
    pub fn apply(&self, withdrawal: &mut Withdrawal) {
        withdrawal.status = self.status();
        match self {
            Self::Approved { at } => withdrawal.approved_at = Some(*at),
            Self::Rejected { at, reason } => {
                withdrawal.rejected_at = Some(*at);
                withdrawal.reason = Some(reason.clone());
            }
        }
    }
}

/// Withdrawal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    /// Awaiting an operator decision.
    Pending,

    /// Paid out; the reward's withdrawn total includes it.
    Approved,

    /// Declined; the reward is untouched.
    Rejected,
}

impl WithdrawalStatus {
    /// The storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WithdrawalStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(UnknownVariant {
                kind: "withdrawal status",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> Withdrawal {
        Withdrawal::pending(UserId::generate(), RewardId::generate(), dec!(50), Utc::now())
    }

    #[test]
    fn rejection_records_reason_and_time() {
        let mut withdrawal = request();
        let at = Utc::now();
        Resolution::Rejected {
            at,
            reason: "documents missing".into(),
        }
        .apply(&mut withdrawal);

        assert_eq!(withdrawal.status, WithdrawalStatus::Rejected);
        assert_eq!(withdrawal.rejected_at, Some(at));
        assert_eq!(withdrawal.reason.as_deref(), Some("documents missing"));
        assert!(withdrawal.approved_at.is_none());
    }

    #[test]
    fn terminal_states_refuse_further_processing() {
        let mut withdrawal = request();
        assert!(withdrawal.ensure_pending().is_ok());

        Resolution::Approved { at: Utc::now() }.apply(&mut withdrawal);
        let err = withdrawal.ensure_pending().unwrap_err();
        assert!(matches!(
            err,
            LedgerError::AlreadyProcessed { ref status, .. } if status == "approved"
        ));
    }
}
