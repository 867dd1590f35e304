//! Daily deadline scan: queue reminder events for upcoming event start dates

use crate::publisher::{self, Trigger};
use crate::store::{EntityStore, StoreError};
use chrono::{Days, NaiveDate};
use stream_broker::StreamBroker;

/// Reminders go out this many days before an event starts
pub const REMINDER_DAYS: [u64; 3] = [7, 3, 1];

/// One reminder queued by a scan
#[derive(Debug, Clone)]
pub struct QueuedReminder {
    pub event_name: String,
    pub days_remaining: u64,
    pub start_date: NaiveDate,
}

/// Queue one `event_deadline_reminder` per event starting exactly
/// `REMINDER_DAYS` after `today`.
///
/// Meant to run once per calendar day. Rerunning within the same day may
/// duplicate entries on the stream; the delivery engine's idempotency check
/// is what prevents double emails.
pub async fn check_event_deadlines(
    store: &dyn EntityStore,
    broker: &dyn StreamBroker,
    today: NaiveDate,
) -> Result<Vec<QueuedReminder>, StoreError> {
    let mut queued = Vec::new();

    for days in REMINDER_DAYS {
        let Some(target_date) = today.checked_add_days(Days::new(days)) else {
            continue;
        };

        for event in store.events_starting_on(target_date).await? {
            tracing::info!(
                event = %event.name,
                days_remaining = days,
                start_date = %target_date,
                "Queueing deadline reminder"
            );
            publisher::publish_event_notification(
                broker,
                &event,
                Trigger::DeadlineReminder,
                Some(days as u32),
                None,
            )
            .await;
            queued.push(QueuedReminder {
                event_name: event.name.clone(),
                days_remaining: days,
                start_date: target_date,
            });
        }
    }

    Ok(queued)
}
