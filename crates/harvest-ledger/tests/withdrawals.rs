//! Withdrawal ledger integration tests.

mod common;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::TestHarness;
use harvest_core::{LedgerError, Reward, RewardId, UserId, WithdrawalId, WithdrawalStatus};
use harvest_store::FailPoint;

async fn funded_reward(harness: &TestHarness, amount: Decimal) -> RewardId {
    let reward = Reward::referral(harness.owner, amount, harness.now());
    harness.engine.rewards.create(reward.clone()).await.unwrap();
    reward.id
}

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn exact_balance_succeeds_one_cent_more_fails() {
    let harness = TestHarness::new();
    let reward_id = funded_reward(&harness, dec!(50)).await;
    let withdrawals = &harness.engine.withdrawals;

    let err = withdrawals
        .create(harness.owner, reward_id, dec!(50.01))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds { available, requested }
            if available == dec!(50) && requested == dec!(50.01)
    ));

    let id = withdrawals
        .create(harness.owner, reward_id, dec!(50))
        .await
        .unwrap();
    let withdrawal = withdrawals.get(id).await.unwrap();
    assert_eq!(withdrawal.status, WithdrawalStatus::Pending);
    assert_eq!(withdrawal.amount, dec!(50));

    harness.notifier.wait_for(1).await;
    assert_eq!(harness.notifier.subjects(), vec!["New withdrawal request"]);
}

#[tokio::test]
async fn foreign_or_missing_reward_is_not_found() {
    let harness = TestHarness::new();
    let reward_id = funded_reward(&harness, dec!(50)).await;
    let withdrawals = &harness.engine.withdrawals;

    let err = withdrawals
        .create(UserId::generate(), reward_id, dec!(1))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "reward", .. }));

    let err = withdrawals
        .create(harness.owner, RewardId::generate(), dec!(1))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "reward", .. }));
}

#[tokio::test]
async fn non_positive_amount_is_invalid() {
    let harness = TestHarness::new();
    let reward_id = funded_reward(&harness, dec!(50)).await;

    let err = harness
        .engine
        .withdrawals
        .create(harness.owner, reward_id, Decimal::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidArgument(_)));
}

// ============================================================================
// Approve and reject
// ============================================================================

#[tokio::test]
async fn approval_debits_reward() {
    let harness = TestHarness::new();
    let reward_id = funded_reward(&harness, dec!(80)).await;
    let withdrawals = &harness.engine.withdrawals;
    let id = withdrawals
        .create(harness.owner, reward_id, dec!(30))
        .await
        .unwrap();

    withdrawals.approve(id).await.unwrap();

    let withdrawal = withdrawals.get(id).await.unwrap();
    assert_eq!(withdrawal.status, WithdrawalStatus::Approved);
    assert_eq!(withdrawal.approved_at, Some(harness.now()));
    assert!(withdrawal.rejected_at.is_none());

    let reward = harness.engine.rewards.get(reward_id).await.unwrap();
    assert_eq!(reward.withdrawn, dec!(30));
    assert_eq!(reward.available(), dec!(50));
}

#[tokio::test]
async fn reject_then_approve_is_already_processed() {
    let harness = TestHarness::new();
    let reward_id = funded_reward(&harness, dec!(80)).await;
    let withdrawals = &harness.engine.withdrawals;
    let id = withdrawals
        .create(harness.owner, reward_id, dec!(30))
        .await
        .unwrap();

    withdrawals.reject(id, "wallet mismatch").await.unwrap();
    let err = withdrawals.approve(id).await.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyProcessed { .. }));

    let withdrawal = withdrawals.get(id).await.unwrap();
    assert_eq!(withdrawal.status, WithdrawalStatus::Rejected);
    assert_eq!(withdrawal.reason.as_deref(), Some("wallet mismatch"));
    assert_eq!(
        harness.engine.rewards.get(reward_id).await.unwrap().withdrawn,
        Decimal::ZERO
    );
}

#[tokio::test]
async fn approve_then_reject_is_already_processed() {
    let harness = TestHarness::new();
    let reward_id = funded_reward(&harness, dec!(80)).await;
    let withdrawals = &harness.engine.withdrawals;
    let id = withdrawals
        .create(harness.owner, reward_id, dec!(30))
        .await
        .unwrap();

    withdrawals.approve(id).await.unwrap();
    let err = withdrawals.reject(id, "too late").await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::AlreadyProcessed { ref status, .. } if status == "approved"
    ));

    let err = withdrawals.approve(id).await.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyProcessed { .. }));
    assert_eq!(
        harness.engine.rewards.get(reward_id).await.unwrap().withdrawn,
        dec!(30)
    );
}

#[tokio::test]
async fn unknown_withdrawal_is_not_found() {
    let harness = TestHarness::new();
    let withdrawals = &harness.engine.withdrawals;

    assert!(matches!(
        withdrawals.approve(WithdrawalId::generate()).await,
        Err(LedgerError::NotFound { .. })
    ));
    assert!(matches!(
        withdrawals.reject(WithdrawalId::generate(), "x").await,
        Err(LedgerError::NotFound { .. })
    ));
}

#[tokio::test]
async fn approval_revalidates_balance() {
    let harness = TestHarness::new();
    let reward_id = funded_reward(&harness, dec!(50)).await;
    let withdrawals = &harness.engine.withdrawals;

    let first = withdrawals
        .create(harness.owner, reward_id, dec!(40))
        .await
        .unwrap();
    let second = withdrawals
        .create(harness.owner, reward_id, dec!(40))
        .await
        .unwrap();

    withdrawals.approve(first).await.unwrap();
    let err = withdrawals.approve(second).await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    assert_eq!(
        withdrawals.get(second).await.unwrap().status,
        WithdrawalStatus::Pending
    );
}

#[tokio::test]
async fn failed_debit_rolls_back_approval() {
    let harness = TestHarness::new();
    let reward_id = funded_reward(&harness, dec!(50)).await;
    let withdrawals = &harness.engine.withdrawals;
    let id = withdrawals
        .create(harness.owner, reward_id, dec!(10))
        .await
        .unwrap();

    harness.store.fail_next(FailPoint::AddWithdrawn);
    assert!(withdrawals.approve(id).await.is_err());

    assert_eq!(withdrawals.get(id).await.unwrap().status, WithdrawalStatus::Pending);
    assert_eq!(
        harness.engine.rewards.get(reward_id).await.unwrap().withdrawn,
        Decimal::ZERO
    );

    withdrawals.approve(id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_never_overdraw() {
    let harness = TestHarness::new();
    let reward_id = funded_reward(&harness, dec!(100)).await;

    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(
            harness
                .engine
                .withdrawals
                .create(harness.owner, reward_id, dec!(30))
                .await
                .unwrap(),
        );
    }

    let mut handles = Vec::new();
    for id in ids {
        let withdrawals = harness.engine.withdrawals.clone();
        handles.push(tokio::spawn(async move { withdrawals.approve(id).await }));
    }

    let mut approved = 0u32;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => approved += 1,
            Err(LedgerError::InsufficientFunds { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(approved, 3);
    let reward = harness.engine.rewards.get(reward_id).await.unwrap();
    assert_eq!(reward.withdrawn, dec!(90));
    assert!(reward.withdrawn <= reward.accrued);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_decisions_report_the_final_status() {
    let harness = TestHarness::new();
    let reward_id = funded_reward(&harness, dec!(100)).await;
    let id = harness
        .engine
        .withdrawals
        .create(harness.owner, reward_id, dec!(40))
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
    assert_ne!(stored.status, WithdrawalStatus::Pending);
    assert_eq!(reported.len(), 7);
    assert!(reported.iter().all(|status| *status == stored.status.to_string()));

    let reward = harness.engine.rewards.get(reward_id).await.unwrap();
    let debited = if stored.status == WithdrawalStatus::Approved {
        dec!(40)
    } else {
        Decimal::ZERO
    };
    assert_eq!(reward.withdrawn, debited);
}

// ============================================================================
// Queries
// ============================================================================

#[tokio::test]
async fn listings_filter_by_user_and_status() {
    let harness = TestHarness::new();
    let reward_id = funded_reward(&harness, dec!(100)).await;
    let withdrawals = &harness.engine.withdrawals;

    let approved = withdrawals
        .create(harness.owner, reward_id, dec!(10))
        .await
        .unwrap();
    let pending = withdrawals
        .create(harness.owner, reward_id, dec!(10))
        .await
        .unwrap();
    withdrawals.approve(approved).await.unwrap();

    let other = UserId::generate();
    let other_reward = Reward::referral(other, dec!(5), harness.now());
    harness.engine.rewards.create(other_reward.clone()).await.unwrap();
    withdrawals.create(other, other_reward.id, dec!(5)).await.unwrap();

    assert_eq!(withdrawals.by_user(harness.owner).await.unwrap().len(), 2);
    assert_eq!(withdrawals.all().await.unwrap().len(), 3);

    let pending_ids: Vec<_> = withdrawals
        .pending()
        .await
        .unwrap()
        .into_iter()
        .map(|w| w.id)
        .collect();
    assert_eq!(pending_ids.len(), 2);
    assert!(pending_ids.contains(&pending));
    assert!(!pending_ids.contains(&approved));
}
