//! Delivery-engine behavior under transport failure: backoff schedule,
//! recovery mid-budget, and the idempotency probe.

mod common;

use common::{user, InMemoryLedger, RecordingMailer};
use nest_notifications::delivery::DeliveryEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn engine(mailer: &Arc<RecordingMailer>, ledger: &Arc<InMemoryLedger>) -> DeliveryEngine {
    DeliveryEngine::new(mailer.clone(), ledger.clone())
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_take_the_full_backoff_schedule() {
    let mailer = Arc::new(RecordingMailer::failing_always());
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = engine(&mailer, &ledger);
    let recipient = user(7, "u7@example.com", true);

    let started = Instant::now();
    let delivered = engine
        .deliver_with_retry(
            &recipient,
            "event_updated",
            "Event Updated: AppSec",
            "The OWASP event 'AppSec' has been updated.",
            "https://nest.owasp.org/events/10",
        )
        .await;

    assert!(!delivered);
    // Initial attempt plus five retries
    assert_eq!(mailer.attempt_count(), 6);
    // 2 + 4 + 8 + 16 + 32 seconds of backoff, no sleep after the last failure
    assert_eq!(started.elapsed(), Duration::from_secs(62));
    assert!(ledger.rows().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_success_mid_budget_stops_retrying() {
    let mailer = Arc::new(RecordingMailer::failing_times(2));
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = engine(&mailer, &ledger);
    let recipient = user(7, "u7@example.com", true);

    let started = Instant::now();
    let delivered = engine
        .deliver_with_retry(
            &recipient,
            "chapter_created",
            "New Chapter Created: Gdansk",
            "A new OWASP chapter has been created: Gdansk",
            "https://nest.owasp.org/chapters/5",
        )
        .await;

    assert!(delivered);
    assert_eq!(mailer.attempt_count(), 3);
    // Only the first two backoffs were paid
    assert_eq!(started.elapsed(), Duration::from_secs(6));
    assert_eq!(ledger.rows().len(), 1);
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn test_duplicate_delivery_is_skipped_silently() {
    let mailer = Arc::new(RecordingMailer::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = engine(&mailer, &ledger);
    let recipient = user(7, "u7@example.com", true);

    for _ in 0..2 {
        let delivered = engine
            .deliver_with_retry(
                &recipient,
                "chapter_created",
                "New Chapter Created: Gdansk",
                "A new OWASP chapter has been created: Gdansk",
                "https://nest.owasp.org/chapters/5",
            )
            .await;
        assert!(delivered);
    }

    // Second call hit the ledger, not the transport
    assert_eq!(mailer.attempt_count(), 1);
    assert_eq!(ledger.rows().len(), 1);
}

#[tokio::test]
async fn test_different_message_is_not_deduplicated() {
    let mailer = Arc::new(RecordingMailer::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = engine(&mailer, &ledger);
    let recipient = user(7, "u7@example.com", true);

    for message in ["body one", "body two"] {
        assert!(
            engine
                .deliver_with_retry(
                    &recipient,
                    "chapter_updated",
                    "Chapter Updated: Gdansk",
                    message,
                    "https://nest.owasp.org/chapters/5",
                )
                .await
        );
    }

    assert_eq!(mailer.sent().len(), 2);
    assert_eq!(ledger.rows().len(), 2);
}
