//! Combined per-user view of deposits, withdrawals and rewards.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Deposit, Reward, Withdrawal};

/// Everything a user has on the books.
///
/// Assembled from independent reads; not a point-in-time snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operations {
    /// The user's deposits, newest first.
    pub deposits: Vec<Deposit>,

    /// The user's withdrawal requests, newest first.
    pub withdrawals: Vec<Withdrawal>,

    /// The user's rewards, newest first.
    pub rewards: Vec<Reward>,
}

impl Operations {
    /// Sum of available balances across the listed rewards.
    #[must_use]
    pub fn available_balance(&self) -> Decimal {
        self.rewards.iter().map(Reward::available).sum()
    }
}
