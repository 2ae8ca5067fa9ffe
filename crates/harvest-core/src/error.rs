//! Error types for harvest.

use rust_decimal::Decimal;

use crate::ids::IdError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record ("deposit", "reward", ...).
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Malformed parameters, rejected before any write.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Withdrawal amount exceeds the reward's available balance.
    #[error("insufficient funds: available={available}, requested={requested}")]
    InsufficientFunds {
        /// Accrued minus withdrawn at the time of the check.
        available: Decimal,
        /// Amount that was requested.
        requested: Decimal,
    },

    /// The record already left the state the operation requires.
    #[error("{entity} {id} already processed (status: {status})")]
    AlreadyProcessed {
        /// Kind of record.
        entity: &'static str,
        /// The record identifier.
        id: String,
        /// The status the record is in.
        status: String,
    },

    /// Tariff lookup failed or the tariff lacks required terms.
    #[error("tariff resolution failed: {0}")]
    Resolution(String),

    /// Storage timeout or connection failure. Safe to retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// An amount left the representable range.
    #[error("arithmetic overflow: {0}")]
    Overflow(String),

    /// Non-retryable storage fault.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

/// A stored enum value that no variant matches.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    /// The enum being parsed ("deposit status", "reward kind", ...).
    pub kind: &'static str,
    /// The offending value.
    pub value: String,
}

impl LedgerError {
    /// Build a `NotFound` error for the given entity.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the caller may retry the operation unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
