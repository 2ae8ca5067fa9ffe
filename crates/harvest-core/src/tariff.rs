//! Tariffs and deposit approval policies.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::{DepositTerms, TariffId};

/// A named preset of lock-until and daily reward rate.
///
/// Catalog rows may be incomplete; only complete tariffs can approve deposits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tariff {
    /// Tariff identifier.
    pub id: TariffId,

    /// Display name.
    pub name: String,

    /// Lock-until applied to deposits approved under this tariff.
    pub lock_until: Option<DateTime<Utc>>,

    /// Daily reward rate applied to deposits approved under this tariff.
    pub daily_rate: Option<Decimal>,

    /// When the tariff was created.
    pub created_at: DateTime<Utc>,
}

impl Tariff {
    /// The deposit terms this tariff grants.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Resolution` if either field is missing.
    pub fn terms(&self) -> Result<DepositTerms, LedgerError> {
        match (self.lock_until, self.daily_rate) {
            (Some(lock_until), Some(daily_rate)) => Ok(DepositTerms {
                lock_until,
                daily_rate,
            }),
            _ => Err(LedgerError::Resolution(format!(
                "tariff {} ({}) lacks lock-until or daily rate",
                self.id, self.name
            ))),
        }
    }
}

/// How an approval obtains its lock-until and daily rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    /// Terms given directly by the operator.
    Explicit(DepositTerms),

    /// Terms copied from a catalog tariff.
    ByTariff(TariffId),
}

impl ApprovalPolicy {
    /// Explicit terms.
    #[must_use]
    pub const fn explicit(lock_until: DateTime<Utc>, daily_rate: Decimal) -> Self {
        Self::Explicit(DepositTerms {
            lock_until,
            daily_rate,
        })
    }

    /// Build a policy from loosely-typed request parameters.
    ///
    /// Exactly one of "lock-until and daily rate" or "tariff" must be given.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidArgument` for any other combination or for
    /// a negative daily rate.
    pub fn from_parts(
        lock_until: Option<DateTime<Utc>>,
        daily_rate: Option<Decimal>,
        tariff_id: Option<TariffId>,
    ) -> Result<Self, LedgerError> {
        let policy = match (lock_until, daily_rate, tariff_id) {
            (Some(lock_until), Some(daily_rate), None) => Self::explicit(lock_until, daily_rate),
            (None, None, Some(tariff_id)) => Self::ByTariff(tariff_id),
            (_, _, Some(_)) => {
                return Err(LedgerError::InvalidArgument(
                    "pass either lock-until and daily rate, or a tariff, not both".into(),
                ))
            }
            _ => {
                return Err(LedgerError::InvalidArgument(
                    "pass both lock-until and daily rate, or a tariff".into(),
                ))
            }
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Reject explicit terms with a negative rate.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidArgument` if the explicit rate is negative.
    pub fn validate(&self) -> Result<(), LedgerError> {
        match self {
            Self::Explicit(terms) if terms.daily_rate.is_sign_negative() => Err(
                LedgerError::InvalidArgument(format!("negative daily rate {}", terms.daily_rate)),
            ),
            _ => Ok(()),
        }
    }
}
