//! Producer side: serialize domain events onto the main stream
//!
//! Every function here swallows broker failures after logging them. A
//! missed notification is acceptable; unwinding into the entity store's
//! commit path is not. This is the only place producer-side errors are
//! swallowed.

use crate::changes::ChangedFields;
use crate::models::{Chapter, Event, Snapshot};
use chrono::Utc;
use stream_broker::{StreamBroker, StreamRecord};

/// Append-only log of domain events feeding the worker
pub const STREAM_KEY: &str = "owasp_notifications";

/// What happened to the entity at the commit boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Created,
    Updated,
    DeadlineReminder,
}

impl Trigger {
    fn as_str(&self) -> &'static str {
        match self {
            Trigger::Created => "created",
            Trigger::Updated => "updated",
            Trigger::DeadlineReminder => "deadline_reminder",
        }
    }
}

/// Seconds since epoch, the stream's timestamp encoding
fn timestamp_now() -> String {
    Utc::now().timestamp().to_string()
}

/// Publish a notification for a published snapshot
pub async fn publish_snapshot_notification(broker: &dyn StreamBroker, snapshot: &Snapshot) {
    let record = StreamRecord::new()
        .with("type", "snapshot_published")
        .with("snapshot_id", snapshot.id.to_string())
        .with("timestamp", timestamp_now());

    match broker.append(STREAM_KEY, &record).await {
        Ok(_) => tracing::info!(snapshot_id = snapshot.id, "Published snapshot notification"),
        Err(e) => tracing::error!(
            snapshot_id = snapshot.id,
            error = %e,
            "Failed to publish snapshot notification"
        ),
    }
}

/// Publish a notification for a chapter creation or update
pub async fn publish_chapter_notification(
    broker: &dyn StreamBroker,
    chapter: &Chapter,
    trigger: Trigger,
    changed_fields: Option<&ChangedFields>,
) {
    let msg_type = format!("chapter_{}", trigger.as_str());
    let mut record = StreamRecord::new()
        .with("type", msg_type.as_str())
        .with("chapter_id", chapter.id.to_string())
        .with("timestamp", timestamp_now());
    if !attach_changed_fields(&mut record, changed_fields, &msg_type, chapter.id) {
        return;
    }

    match broker.append(STREAM_KEY, &record).await {
        Ok(_) => tracing::info!(
            msg_type = %msg_type,
            chapter_id = chapter.id,
            "Published chapter notification"
        ),
        Err(e) => tracing::error!(
            msg_type = %msg_type,
            chapter_id = chapter.id,
            error = %e,
            "Failed to publish chapter notification"
        ),
    }
}

/// Publish a notification for an event creation, update, or deadline
/// reminder
pub async fn publish_event_notification(
    broker: &dyn StreamBroker,
    event: &Event,
    trigger: Trigger,
    days_remaining: Option<u32>,
    changed_fields: Option<&ChangedFields>,
) {
    let msg_type = format!("event_{}", trigger.as_str());
    let mut record = StreamRecord::new()
        .with("type", msg_type.as_str())
        .with("event_id", event.id.to_string())
        .with("timestamp", timestamp_now());
    if let Some(days) = days_remaining {
        record.set("days_remaining", days.to_string());
    }
    if !attach_changed_fields(&mut record, changed_fields, &msg_type, event.id) {
        return;
    }

    match broker.append(STREAM_KEY, &record).await {
        Ok(_) => tracing::info!(
            msg_type = %msg_type,
            event_id = event.id,
            "Published event notification"
        ),
        Err(e) => tracing::error!(
            msg_type = %msg_type,
            event_id = event.id,
            error = %e,
            "Failed to publish event notification"
        ),
    }
}

/// JSON-encode a non-empty diff into the record. Returns `false` when
/// encoding failed and the publish should be abandoned.
fn attach_changed_fields(
    record: &mut StreamRecord,
    changed_fields: Option<&ChangedFields>,
    msg_type: &str,
    entity_id: i64,
) -> bool {
    let Some(changes) = changed_fields.filter(|c| !c.is_empty()) else {
        return true;
    };

    match serde_json::to_string(changes) {
        Ok(json) => {
            record.set("changed_fields", json);
            true
        }
        Err(e) => {
            tracing::error!(
                msg_type = %msg_type,
                entity_id,
                error = %e,
                "Failed to encode changed fields"
            );
            false
        }
    }
}
