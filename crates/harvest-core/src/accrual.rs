//! Daily accrual arithmetic.
//!
//! Accrual works in whole days. The clock stays anchored to day boundaries
//! counted from the first accrual run, so leftover hours carry into the next
//! call instead of being lost, and repeated calls within a day change nothing.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::error::LedgerError;

/// Hours in one accrual day.
const HOURS_PER_DAY: i64 = 24;

/// What a single accrual call should persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccrualStep {
    /// First run for this reward: anchor the clock at `at`, accrue nothing.
    Anchor {
        /// The new last-accrual timestamp.
        at: DateTime<Utc>,
    },

    /// Less than one whole day since the anchor.
    Idle,

    /// Credit `delta` for `days` whole days and move the anchor forward.
    Accrue {
        /// Whole days credited.
        days: i64,
        /// Amount added to the reward's accrued total.
        delta: Decimal,
        /// `last + days`, not `now`.
        anchored_at: DateTime<Utc>,
    },
}

impl AccrualStep {
    /// The amount this step adds to the accrued total.
    #[must_use]
    pub fn delta(&self) -> Decimal {
        match self {
            Self::Accrue { delta, .. } => *delta,
            Self::Anchor { .. } | Self::Idle => Decimal::ZERO,
        }
    }

    /// The last-accrual timestamp to persist, if anything changes.
    #[must_use]
    pub const fn anchor(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Anchor { at } => Some(*at),
            Self::Accrue { anchored_at, .. } => Some(*anchored_at),
            Self::Idle => None,
        }
    }
}

/// Plan one accrual call.
///
/// `delta = principal * daily_rate * days`, where `days` is the number of
/// whole 24-hour periods between `last` and `now`. A `now` earlier than
/// `last` is treated as no elapsed time.
///
/// # Errors
///
/// Returns `LedgerError::Overflow` if `delta` does not fit in a `Decimal`.
pub fn plan_accrual(
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    principal: Decimal,
    daily_rate: Decimal,
) -> Result<AccrualStep, LedgerError> {
    let Some(last) = last else {
        return Ok(AccrualStep::Anchor { at: now });
    };

    let days = (now - last).num_hours() / HOURS_PER_DAY;
    if days <= 0 {
        return Ok(AccrualStep::Idle);
    }

    let delta = principal
        .checked_mul(daily_rate)
        .and_then(|daily| daily.checked_mul(Decimal::from(days)))
        .ok_or_else(|| {
            LedgerError::Overflow(format!(
                "{days} days of {principal} at {daily_rate} per day"
            ))
        })?;

    Ok(AccrualStep::Accrue {
        days,
        delta,
        anchored_at: last + Duration::days(days),
    })
}
