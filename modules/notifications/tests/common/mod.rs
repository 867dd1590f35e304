//! Shared in-memory fakes for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use nest_notifications::ledger::{DeliveryKey, DeliveryReceipt, LedgerError, NotificationLedger};
use nest_notifications::mailer::{MailError, Mailer};
use nest_notifications::models::{Chapter, EntityKind, Event, Snapshot, SubscriptionScope, User};
use nest_notifications::store::{EntityStore, StoreError, SubscriptionDirectory};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

// ============================================================================
// Entity store
// ============================================================================

#[derive(Default)]
pub struct FakeEntityStore {
    chapters: HashMap<i64, Chapter>,
    events: HashMap<i64, Event>,
    snapshots: HashMap<i64, Snapshot>,
    unavailable: AtomicBool,
}

impl FakeEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chapter(mut self, chapter: Chapter) -> Self {
        self.chapters.insert(chapter.id, chapter);
        self
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.events.insert(event.id, event);
        self
    }

    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshots.insert(snapshot.id, snapshot);
        self
    }

    /// Make every lookup fail, simulating a database outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EntityStore for FakeEntityStore {
    async fn chapter(&self, id: i64) -> Result<Option<Chapter>, StoreError> {
        self.check_available()?;
        Ok(self.chapters.get(&id).cloned())
    }

    async fn event(&self, id: i64) -> Result<Option<Event>, StoreError> {
        self.check_available()?;
        Ok(self.events.get(&id).cloned())
    }

    async fn snapshot(&self, id: i64) -> Result<Option<Snapshot>, StoreError> {
        self.check_available()?;
        Ok(self.snapshots.get(&id).cloned())
    }

    async fn events_starting_on(&self, date: NaiveDate) -> Result<Vec<Event>, StoreError> {
        self.check_available()?;
        let mut events: Vec<Event> = self
            .events
            .values()
            .filter(|event| event.start_date == Some(date))
            .cloned()
            .collect();
        events.sort_by_key(|event| event.id);
        Ok(events)
    }
}

// ============================================================================
// Subscription directory
// ============================================================================

#[derive(Default)]
pub struct FakeSubscriptions {
    // (kind, object_id sentinel, user) rows, as the directory stores them
    rows: Vec<(EntityKind, i64, User)>,
}

impl FakeSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: EntityKind, object_id: i64, user: User) -> Self {
        self.rows.push((kind, object_id, user));
        self
    }
}

#[async_trait]
impl SubscriptionDirectory for FakeSubscriptions {
    async fn active_subscribers(
        &self,
        kind: EntityKind,
        scope: SubscriptionScope,
    ) -> Result<Vec<User>, StoreError> {
        Ok(self
            .rows
            .iter()
            .filter(|(row_kind, object_id, user)| {
                *row_kind == kind && *object_id == scope.object_id() && user.is_active
            })
            .map(|(_, _, user)| user.clone())
            .collect())
    }
}

// ============================================================================
// Mailer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Records every accepted send; can be told to fail the next N attempts or
/// every attempt
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentEmail>>,
    pub attempts: AtomicU32,
    fail_remaining: AtomicU32,
    fail_always: AtomicBool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_times(times: u32) -> Self {
        let mailer = Self::default();
        mailer.fail_remaining.store(times, Ordering::SeqCst);
        mailer
    }

    pub fn failing_always() -> Self {
        let mailer = Self::default();
        mailer.fail_always.store(true, Ordering::SeqCst);
        mailer
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().expect("mailer state poisoned").clone()
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.fail_always.load(Ordering::SeqCst) {
            return Err(MailError::Transport("smtp unavailable".to_string()));
        }
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MailError::Transport("smtp unavailable".to_string()));
        }

        self.sent.lock().expect("mailer state poisoned").push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Default)]
pub struct InMemoryLedger {
    rows: Mutex<Vec<DeliveryReceipt>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<DeliveryReceipt> {
        self.rows.lock().expect("ledger state poisoned").clone()
    }
}

#[async_trait]
impl NotificationLedger for InMemoryLedger {
    async fn was_delivered(&self, key: &DeliveryKey) -> Result<bool, LedgerError> {
        Ok(self
            .rows
            .lock()
            .expect("ledger state poisoned")
            .iter()
            .any(|row| row.key() == *key))
    }

    async fn record(&self, receipt: &DeliveryReceipt) -> Result<(), LedgerError> {
        self.rows
            .lock()
            .expect("ledger state poisoned")
            .push(receipt.clone());
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn user(id: i64, email: &str, is_active: bool) -> User {
    User {
        id,
        email: email.to_string(),
        is_active,
    }
}

pub fn chapter(id: i64, name: &str, country: Option<&str>) -> Chapter {
    Chapter {
        id,
        name: name.to_string(),
        country: country.map(String::from),
        region: None,
        suggested_location: None,
        description: None,
    }
}

pub fn event(id: i64, name: &str, start_date: Option<NaiveDate>) -> Event {
    Event {
        id,
        name: name.to_string(),
        start_date,
        end_date: None,
        suggested_location: None,
        url: None,
        description: None,
    }
}

pub fn snapshot(id: i64, title: &str, key: &str) -> Snapshot {
    Snapshot {
        id,
        title: title.to_string(),
        key: key.to_string(),
    }
}

// ============================================================================
// Assembled pipeline
// ============================================================================

use nest_notifications::delivery::DeliveryEngine;
use nest_notifications::dispatch::Dispatcher;
use nest_notifications::worker::NotificationWorker;
use std::sync::Arc;
use stream_broker::{InMemoryBroker, StreamBroker};

pub const SITE_URL: &str = "https://nest.owasp.org";

/// A fully wired worker over in-memory collaborators
pub struct TestPipeline {
    pub broker: InMemoryBroker,
    pub store: Arc<FakeEntityStore>,
    pub mailer: Arc<RecordingMailer>,
    pub ledger: Arc<InMemoryLedger>,
    pub worker: NotificationWorker,
}

pub fn pipeline(
    store: FakeEntityStore,
    subscriptions: FakeSubscriptions,
    mailer: RecordingMailer,
) -> TestPipeline {
    let broker = InMemoryBroker::new();
    let store = Arc::new(store);
    let mailer = Arc::new(mailer);
    let ledger = Arc::new(InMemoryLedger::new());

    let delivery = DeliveryEngine::new(mailer.clone(), ledger.clone());
    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(subscriptions),
        delivery,
        Arc::new(broker.clone()) as Arc<dyn StreamBroker>,
        SITE_URL,
    );
    let worker = NotificationWorker::new(
        Arc::new(broker.clone()) as Arc<dyn StreamBroker>,
        dispatcher,
        "testhost_1",
    );

    TestPipeline {
        broker,
        store,
        mailer,
        ledger,
        worker,
    }
}
