//! Core types and utilities for harvest.
//!
//! This crate provides the foundational types of the deposit and reward engine:
//!
//! - **Identifiers**: `UserId`, `TariffId`, `DepositId`, `RewardId`, `WithdrawalId`
//! - **Deposits**: `Deposit`, `DepositStatus`, `DepositTerms`
//! - **Rewards**: `Reward`, `RewardKind`, and the daily accrual arithmetic
//! - **Withdrawals**: `Withdrawal`, `WithdrawalStatus`, `Resolution`
//! - **Tariffs**: `Tariff`, `ApprovalPolicy`
//!
//! # Money
//!
//! Amounts and rates are `rust_decimal::Decimal`. A daily rate is a fraction of
//! the principal per whole day: `0.001` is 0.1 % per day.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod accrual;
pub mod deposit;
pub mod error;
pub mod ids;
pub mod operations;
pub mod reward;
pub mod tariff;
pub mod withdrawal;

pub use accrual::{plan_accrual, AccrualStep};
pub use deposit::{Deposit, DepositStatus, DepositTerms};
pub use error::{LedgerError, Result, UnknownVariant};
pub use ids::{DepositId, IdError, RewardId, TariffId, UserId, WithdrawalId};
pub use operations::Operations;
pub use reward::{Reward, RewardKind};
pub use tariff::{ApprovalPolicy, Tariff};
pub use withdrawal::{Resolution, Withdrawal, WithdrawalStatus};

pub use rust_decimal::Decimal;
