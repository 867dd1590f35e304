//! Producer-side behavior: commit hooks, diff minimality, and the wire
//! shape of published records.

mod common;

use common::{chapter, event, snapshot, FakeEntityStore};
use nest_notifications::changes::{
    chapter_committed, event_committed, prior_chapter_fields, prior_event_fields,
};
use nest_notifications::publisher::{publish_snapshot_notification, STREAM_KEY};
use stream_broker::{InMemoryBroker, StreamBroker};

#[tokio::test]
async fn test_chapter_creation_publishes_created_event() {
    let broker = InMemoryBroker::new();
    let new_chapter = chapter(5, "Gdansk", None);

    chapter_committed(&broker, &new_chapter, true, None).await;

    let entries = broker.range(STREAM_KEY, "-", "+").await.unwrap();
    assert_eq!(entries.len(), 1);
    let record = &entries[0].record;
    assert_eq!(record.get("type"), Some("chapter_created"));
    assert_eq!(record.get("chapter_id"), Some("5"));
    assert!(record.get("timestamp").is_some());
    assert_eq!(record.get("changed_fields"), None);
}

#[tokio::test]
async fn test_chapter_update_publishes_minimal_diff() {
    let broker = InMemoryBroker::new();
    let store = FakeEntityStore::new().with_chapter(chapter(5, "A", Some("X")));

    // Pre-commit capture, then the row changes one field
    let prior = prior_chapter_fields(&store, 5).await.unwrap();
    let updated = chapter(5, "B", Some("X"));
    chapter_committed(&broker, &updated, false, prior.as_ref()).await;

    let entries = broker.range(STREAM_KEY, "-", "+").await.unwrap();
    assert_eq!(entries.len(), 1);
    let record = &entries[0].record;
    assert_eq!(record.get("type"), Some("chapter_updated"));
    assert_eq!(record.get("chapter_id"), Some("5"));
    assert_eq!(
        record.get("changed_fields"),
        Some(r#"{"name":{"old":"A","new":"B"}}"#)
    );
}

#[tokio::test]
async fn test_unchanged_commit_publishes_nothing() {
    let broker = InMemoryBroker::new();
    let store = FakeEntityStore::new().with_chapter(chapter(5, "A", Some("X")));

    let prior = prior_chapter_fields(&store, 5).await.unwrap();
    let unchanged = chapter(5, "A", Some("X"));
    chapter_committed(&broker, &unchanged, false, prior.as_ref()).await;

    assert!(broker.is_empty(STREAM_KEY));
}

#[tokio::test]
async fn test_update_without_prior_snapshot_is_suppressed() {
    // Replayed signal: no prior row was captured
    let broker = InMemoryBroker::new();
    let updated = chapter(5, "B", None);

    chapter_committed(&broker, &updated, false, None).await;

    assert!(broker.is_empty(STREAM_KEY));
}

#[tokio::test]
async fn test_empty_to_absent_transition_is_not_a_change() {
    let broker = InMemoryBroker::new();
    let store = FakeEntityStore::new().with_chapter(chapter(5, "A", Some("")));

    let prior = prior_chapter_fields(&store, 5).await.unwrap();
    let updated = chapter(5, "A", None);
    chapter_committed(&broker, &updated, false, prior.as_ref()).await;

    assert!(broker.is_empty(STREAM_KEY));
}

#[tokio::test]
async fn test_event_date_change_round_trips_through_json() {
    use chrono::NaiveDate;
    use nest_notifications::changes::ChangedFields;

    let broker = InMemoryBroker::new();
    let before = event(10, "AppSec", NaiveDate::from_ymd_opt(2026, 8, 10));
    let store = FakeEntityStore::new().with_event(before);

    let prior = prior_event_fields(&store, 10).await.unwrap();
    let after = event(10, "AppSec", NaiveDate::from_ymd_opt(2026, 8, 17));
    event_committed(&broker, &after, false, prior.as_ref()).await;

    let entries = broker.range(STREAM_KEY, "-", "+").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].record.get("type"), Some("event_updated"));

    let changes: ChangedFields =
        serde_json::from_str(entries[0].record.get("changed_fields").unwrap()).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes["start_date"].old.as_deref(), Some("2026-08-10"));
    assert_eq!(changes["start_date"].new.as_deref(), Some("2026-08-17"));
}

#[tokio::test]
async fn test_snapshot_publication_record_shape() {
    let broker = InMemoryBroker::new();

    publish_snapshot_notification(&broker, &snapshot(3, "Q1", "2026-q1")).await;

    let entries = broker.range(STREAM_KEY, "-", "+").await.unwrap();
    assert_eq!(entries.len(), 1);
    let record = &entries[0].record;
    assert_eq!(record.get("type"), Some("snapshot_published"));
    assert_eq!(record.get("snapshot_id"), Some("3"));
    assert!(record.get("timestamp").is_some());
}
