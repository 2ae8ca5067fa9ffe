//! Shared harness for ledger integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal::Decimal;

use harvest_core::{ApprovalPolicy, DepositId, Tariff, TariffId, UserId};
use harvest_ledger::{Clock, Engine, LedgerConfig, ManualClock, Notifier, NotifyError};
use harvest_store::{MemoryStore, Queries, Store};

/// Records every notification; optionally fails them all.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(subject, _)| subject.clone())
            .collect()
    }

    /// Wait until at least `count` notifications have been attempted.
    pub async fn wait_for(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.sent.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("notification was not sent");
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_operator_notification(
        &self,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        if self.fail {
            Err(NotifyError::Transport("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

/// Fixed starting instant for every test clock.
pub fn day_zero() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

/// A thirty-day lock from day zero at the given rate.
pub fn explicit(rate: Decimal) -> ApprovalPolicy {
    ApprovalPolicy::explicit(day_zero() + ChronoDuration::days(30), rate)
}

pub struct TestHarness {
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: Engine<MemoryStore>,
    pub owner: UserId,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(LedgerConfig::default(), RecordingNotifier::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Self::build(config, RecordingNotifier::default())
    }

    pub fn with_notifier(notifier: RecordingNotifier) -> Self {
        Self::build(LedgerConfig::default(), notifier)
    }

    fn build(config: LedgerConfig, notifier: RecordingNotifier) -> Self {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(day_zero()));
        let notifier = Arc::new(notifier);
        let engine = Engine::new(store.clone(), clock.clone(), notifier.clone(), config);

        Self {
            store,
            clock,
            notifier,
            engine,
            owner: UserId::generate(),
        }
    }

    /// Request and approve a deposit for the harness owner.
    pub async fn approved_deposit(&self, amount: Decimal, rate: Decimal) -> DepositId {
        let id = self.engine.deposits.request(self.owner, amount).await.unwrap();
        self.engine
            .deposits
            .approve(id, self.now(), explicit(rate))
            .await
            .unwrap();
        id
    }

    /// Seed a tariff directly into the catalog table.
    pub async fn seed_tariff(
        &self,
        lock_until: Option<DateTime<Utc>>,
        daily_rate: Option<Decimal>,
    ) -> Tariff {
        let tariff = Tariff {
            id: TariffId::generate(),
            name: "standard".to_string(),
            lock_until,
            daily_rate,
            created_at: day_zero(),
        };
        let mut session = self.store.acquire().await.unwrap();
        session.insert_tariff(&tariff).await.unwrap();
        tariff
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance_days(&self, days: i64) {
        self.clock.advance(ChronoDuration::days(days));
    }
}
