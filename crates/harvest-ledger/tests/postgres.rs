//! Ledger races against PostgreSQL row locks.
//!
//! These tests require a reachable PostgreSQL database. They are skipped
//! unless `DATABASE_URL` is set.
//!
//! Run with: `DATABASE_URL=postgres://... cargo test -p harvest-ledger --test postgres`

use std::sync::Arc;
use std::time::Duration;

use chrono::{DurationRound, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use harvest_core::{AccrualStep, ApprovalPolicy, LedgerError, Reward, UserId, WithdrawalStatus};
use harvest_ledger::{AdminDeposit, Clock, Engine, LedgerConfig, LogNotifier, ManualClock};
use harvest_store::PgStore;

struct PgHarness {
    clock: Arc<ManualClock>,
    engine: Engine<PgStore>,
    owner: UserId,
}

async fn load_harness() -> Option<PgHarness> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        println!("DATABASE_URL not set - skipping PostgreSQL ledger tests");
        return None;
    };
    let store = PgStore::connect(&url, 12, Duration::from_secs(5)).await.ok()?;
    store.migrate().await.ok()?;

    // Postgres keeps microseconds; start on a whole second so stored
    // timestamps compare equal to the clock.
    let start = Utc::now()
        .duration_trunc(chrono::Duration::seconds(1))
        .ok()?;
    let clock = Arc::new(ManualClock::new(start));
    let config = LedgerConfig {
        call_timeout: Duration::from_secs(10),
        approval_timeout: Duration::from_secs(10),
    };
    let engine = Engine::new(store, clock.clone(), Arc::new(LogNotifier), config);

    Some(PgHarness {
        clock,
        engine,
        owner: UserId::generate(),
    })
}

fn explicit(rate: Decimal) -> ApprovalPolicy {
    ApprovalPolicy::explicit(Utc::now() + chrono::Duration::days(30), rate)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_withdrawal_approvals_never_overdraw() {
    let Some(harness) = load_harness().await else {
        return;
    };

    let reward = Reward::referral(harness.owner, dec!(100), Utc::now());
    harness.engine.rewards.create(reward.clone()).await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(
            harness
                .engine
                .withdrawals
                .create(harness.owner, reward.id, dec!(30))
                .await
                .unwrap(),
        );
    }

    let mut handles = Vec::new();
    for id in ids {
        let withdrawals = harness.engine.withdrawals.clone();
        handles.push(tokio::spawn(async move { withdrawals.approve(id).await }));
    }

    let mut approved = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => approved += 1,
            Err(LedgerError::InsufficientFunds { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(approved, 3);
    let stored = harness.engine.rewards.get(reward.id).await.unwrap();
    assert_eq!(stored.withdrawn, dec!(90));
    assert!(stored.withdrawn <= stored.accrued);

    let pending = harness
        .engine
        .withdrawals
        .by_user(harness.owner)
        .await
        .unwrap()
        .into_iter()
        .filter(|w| w.status == WithdrawalStatus::Pending)
        .count();
    assert_eq!(pending, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accruals_credit_a_day_once() {
    let Some(harness) = load_harness().await else {
        return;
    };

    let deposit_id = harness
        .engine
        .deposits
        .create_approved_by_admin(AdminDeposit {
            owner: harness.owner,
            amount: dec!(1000),
            created_at: harness.clock.now(),
            approved_at: None,
            policy: explicit(dec!(0.01)),
            initial_reward: None,
        })
        .await
        .unwrap();

    let anchor = harness
        .engine
        .rewards
        .accrue_daily_for_deposit(deposit_id, dec!(0.01))
        .await
        .unwrap();
    assert!(matches!(anchor, AccrualStep::Anchor { .. }));
    harness.clock.advance(chrono::Duration::days(1));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let rewards = harness.engine.rewards.clone();
        handles.push(tokio::spawn(async move {
            rewards.accrue_daily_for_deposit(deposit_id, dec!(0.01)).await
        }));
    }

    let mut credited = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            AccrualStep::Accrue { days, .. } => {
                assert_eq!(days, 1);
                credited += 1;
            }
            AccrualStep::Idle => {}
            AccrualStep::Anchor { .. } => panic!("accrual clock anchored twice"),
        }
    }

    assert_eq!(credited, 1);
    let reward = harness.engine.rewards.by_deposit(deposit_id).await.unwrap();
    assert_eq!(reward.accrued, dec!(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deposit_approvals_open_one_reward() {
    let Some(harness) = load_harness().await else {
        return;
    };

    let id = harness
        .engine
        .deposits
        .request(harness.owner, dec!(300))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let deposits = harness.engine.deposits.clone();
        let at = harness.clock.now();
        handles.push(tokio::spawn(async move {
            deposits.approve(id, at, explicit(dec!(0.01))).await
        }));
    }

    let mut approved = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => approved += 1,
            Err(LedgerError::AlreadyProcessed { status, .. }) => assert_eq!(status, "approved"),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(approved, 1);
    let rewards = harness.engine.rewards.by_owner(harness.owner).await.unwrap();
    assert_eq!(rewards.len(), 1);
    assert_eq!(rewards[0].accrued, dec!(300));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_withdrawal_decisions_report_the_final_status() {
    let Some(harness) = load_harness().await else {
        return;
    };

    let reward = Reward::referral(harness.owner, dec!(100), Utc::now());
    harness.engine.rewards.create(reward.clone()).await.unwrap();
    let id = harness
        .engine
        .withdrawals
        .create(harness.owner, reward.id, dec!(40))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for round in 0..8 {
        let withdrawals = harness.engine.withdrawals.clone();
        handles.push(tokio::spawn(async move {
            if round % 2 == 0 {
                withdrawals.approve(id).await
            } else {
                withdrawals.reject(id, "duplicate request").await
            }
        }));
    }

    let mut decided = 0;
    let mut reported = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => decided += 1,
            Err(LedgerError::AlreadyProcessed { status, .. }) => reported.push(status),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(decided, 1);
    let stored = harness.engine.withdrawals.get(id).await.unwrap();
    assert!(reported
        .iter()
        .all(|status| *status == stored.status.to_string()));
}
