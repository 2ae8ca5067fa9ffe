//! PostgreSQL backend tests.
//!
//! These tests require a reachable PostgreSQL database. They are skipped
//! unless `DATABASE_URL` is set.
//!
//! Run with: `DATABASE_URL=postgres://... cargo test -p harvest-store --test postgres`

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;

use harvest_core::{
    Deposit, DepositStatus, DepositTerms, Resolution, Reward, Tariff, TariffId, UserId,
    Withdrawal, WithdrawalStatus,
};
use harvest_store::{PgStore, Queries, Store};

async fn load_store() -> Option<PgStore> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        println!("DATABASE_URL not set - skipping PostgreSQL tests");
        return None;
    };
    let store = PgStore::connect(&url, 4, Duration::from_secs(5)).await.ok()?;
    store.migrate().await.ok()?;
    Some(store)
}

fn terms() -> DepositTerms {
    DepositTerms {
        lock_until: Utc::now() + ChronoDuration::days(30),
        daily_rate: dec!(0.01),
    }
}

#[tokio::test]
async fn test_deposit_approval_is_guarded() {
    let Some(store) = load_store().await else {
        return;
    };

    let deposit = Deposit::pending(UserId::generate(), dec!(250), Utc::now());
    let mut session = store.acquire().await.unwrap();
    session.insert_deposit(&deposit).await.unwrap();

    assert!(session
        .approve_deposit(deposit.id, Utc::now(), terms())
        .await
        .unwrap());
    assert!(!session
        .approve_deposit(deposit.id, Utc::now(), terms())
        .await
        .unwrap());

    let stored = session.deposit(deposit.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DepositStatus::Approved);
    assert_eq!(stored.daily_rate(), Some(dec!(0.01)));
    assert_eq!(stored.amount, dec!(250));
}

#[tokio::test]
async fn test_dropped_transaction_rolls_back() {
    let Some(store) = load_store().await else {
        return;
    };

    let deposit = Deposit::pending(UserId::generate(), dec!(10), Utc::now());
    {
        let mut tx = store.begin().await.unwrap();
        tx.insert_deposit(&deposit).await.unwrap();
    }

    let mut session = store.acquire().await.unwrap();
    assert!(session.deposit(deposit.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_withdrawn_never_exceeds_accrued() {
    let Some(store) = load_store().await else {
        return;
    };

    let owner = UserId::generate();
    let reward = Reward::referral(owner, dec!(50), Utc::now());
    let mut tx = store.begin().await.unwrap();
    tx.insert_reward(&reward).await.unwrap();
    tx.commit().await.unwrap();

    let mut session = store.acquire().await.unwrap();
    assert!(!session.add_withdrawn(reward.id, dec!(50.01)).await.unwrap());
    assert!(session.add_withdrawn(reward.id, dec!(50)).await.unwrap());

    let stored = session.reward(reward.id).await.unwrap().unwrap();
    assert_eq!(stored.available(), dec!(0));
}

#[tokio::test]
async fn test_withdrawal_resolves_once() {
    let Some(store) = load_store().await else {
        return;
    };

    let owner = UserId::generate();
    let reward = Reward::referral(owner, dec!(20), Utc::now());
    let withdrawal = Withdrawal::pending(owner, reward.id, dec!(5), Utc::now());

    let mut session = store.acquire().await.unwrap();
    session.insert_reward(&reward).await.unwrap();
    session.insert_withdrawal(&withdrawal).await.unwrap();

    let rejected = Resolution::Rejected {
        at: Utc::now(),
        reason: "duplicate".to_string(),
    };
    assert!(session
        .resolve_withdrawal(withdrawal.id, &rejected)
        .await
        .unwrap());
    let approved = Resolution::Approved { at: Utc::now() };
    assert!(!session
        .resolve_withdrawal(withdrawal.id, &approved)
        .await
        .unwrap());

    let stored = session.withdrawal(withdrawal.id).await.unwrap().unwrap();
    assert_eq!(stored.status, WithdrawalStatus::Rejected);
    assert_eq!(stored.reason.as_deref(), Some("duplicate"));
    assert!(stored.approved_at.is_none());
}

#[tokio::test]
async fn test_tariff_round_trip() {
    let Some(store) = load_store().await else {
        return;
    };

    let tariff = Tariff {
        id: TariffId::generate(),
        name: format!("gold-{}", TariffId::generate()),
        lock_until: Some(Utc::now() + ChronoDuration::days(90)),
        daily_rate: Some(dec!(0.002)),
        created_at: Utc::now(),
    };

    let mut session = store.acquire().await.unwrap();
    session.insert_tariff(&tariff).await.unwrap();
    let stored = session.tariff(tariff.id).await.unwrap().unwrap();
    assert_eq!(stored.daily_rate, Some(dec!(0.002)));
    assert_eq!(stored.name, tariff.name);
}
