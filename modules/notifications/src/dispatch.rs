//! Consumer-side routing: event type → entity handler → subscriber fan-out
//!
//! A record is "handled" (and safe to ack) whenever this module returns
//! `Ok`: that covers real deliveries, skips for unknown types or stale
//! entity references, and terminal failures that were quarantined in the
//! DLQ. Only infrastructure errors (the entity store, the subscription
//! directory) propagate, leaving the entry pending for later recovery.

use crate::changes::ChangedFields;
use crate::delivery::DeliveryEngine;
use crate::dlq::{self, FailedNotification};
use crate::models::{Chapter, EntityKind, Event, Snapshot, SubscriptionScope, User};
use crate::store::{EntityStore, StoreError, SubscriptionDirectory};
use std::sync::Arc;
use stream_broker::{StreamBroker, StreamRecord};
use tracing::{error, info, warn};

/// The six event kinds the router understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    SnapshotPublished,
    ChapterCreated,
    ChapterUpdated,
    EventCreated,
    EventUpdated,
    EventDeadlineReminder,
}

impl NotificationType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "snapshot_published" => Some(Self::SnapshotPublished),
            "chapter_created" => Some(Self::ChapterCreated),
            "chapter_updated" => Some(Self::ChapterUpdated),
            "event_created" => Some(Self::EventCreated),
            "event_updated" => Some(Self::EventUpdated),
            "event_deadline_reminder" => Some(Self::EventDeadlineReminder),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SnapshotPublished => "snapshot_published",
            Self::ChapterCreated => "chapter_created",
            Self::ChapterUpdated => "chapter_updated",
            Self::EventCreated => "event_created",
            Self::EventUpdated => "event_updated",
            Self::EventDeadlineReminder => "event_deadline_reminder",
        }
    }

    fn entity_kind(&self) -> EntityKind {
        match self {
            Self::SnapshotPublished => EntityKind::Snapshot,
            Self::ChapterCreated | Self::ChapterUpdated => EntityKind::Chapter,
            Self::EventCreated | Self::EventUpdated | Self::EventDeadlineReminder => {
                EntityKind::Event
            }
        }
    }

    fn id_field(&self) -> &'static str {
        match self.entity_kind() {
            EntityKind::Snapshot => "snapshot_id",
            EntityKind::Chapter => "chapter_id",
            EntityKind::Event => "event_id",
        }
    }

    /// Creations and publications address the global subscriber set;
    /// updates and reminders address the per-entity set
    fn is_broadcast(&self) -> bool {
        matches!(
            self,
            Self::SnapshotPublished | Self::ChapterCreated | Self::EventCreated
        )
    }
}

/// The entity an event refers to, loaded from the store
enum LoadedEntity {
    Chapter(Chapter),
    Event(Event),
    Snapshot(Snapshot),
}

impl LoadedEntity {
    /// Display name used in message bodies
    fn name(&self) -> &str {
        match self {
            LoadedEntity::Chapter(chapter) => &chapter.name,
            LoadedEntity::Event(event) => &event.name,
            LoadedEntity::Snapshot(snapshot) => &snapshot.title,
        }
    }

    /// `{title}` template variable: the snapshot's title attribute, the
    /// display name otherwise
    fn title(&self) -> &str {
        match self {
            LoadedEntity::Snapshot(snapshot) => &snapshot.title,
            other => other.name(),
        }
    }

    fn link_path(&self) -> String {
        match self {
            LoadedEntity::Chapter(chapter) => format!("chapters/{}", chapter.id),
            LoadedEntity::Event(event) => format!("events/{}", event.id),
            LoadedEntity::Snapshot(snapshot) => format!("community/snapshots/{}", snapshot.key),
        }
    }
}

/// Errors that leave a stream entry unhandled (the worker will not ack)
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Maps decoded stream records to per-recipient deliveries
pub struct Dispatcher {
    entities: Arc<dyn EntityStore>,
    subscriptions: Arc<dyn SubscriptionDirectory>,
    delivery: DeliveryEngine,
    broker: Arc<dyn StreamBroker>,
    site_url: String,
}

impl Dispatcher {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        subscriptions: Arc<dyn SubscriptionDirectory>,
        delivery: DeliveryEngine,
        broker: Arc<dyn StreamBroker>,
        site_url: impl Into<String>,
    ) -> Self {
        Self {
            entities,
            subscriptions,
            delivery,
            broker,
            site_url: site_url.into(),
        }
    }

    /// Route one decoded record
    pub async fn dispatch(&self, record: &StreamRecord) -> Result<(), DispatchError> {
        let tag = record.get("type").unwrap_or_default();
        let Some(notification_type) = NotificationType::from_tag(tag) else {
            warn!(message_type = tag, "Unknown message type");
            return Ok(());
        };

        self.handle_entity_notification(notification_type, record)
            .await
    }

    async fn handle_entity_notification(
        &self,
        notification_type: NotificationType,
        record: &StreamRecord,
    ) -> Result<(), DispatchError> {
        let kind = notification_type.entity_kind();

        let Some(raw_id) = record.get(notification_type.id_field()) else {
            return Ok(());
        };
        let Ok(entity_id) = raw_id.parse::<i64>() else {
            warn!(
                field = notification_type.id_field(),
                value = raw_id,
                "Malformed entity id in stream record"
            );
            return Ok(());
        };

        // A stale reference must not block the pipeline
        let Some(entity) = self.load_entity(kind, entity_id).await? else {
            error!(%kind, entity_id, "Entity matching ID not found");
            return Ok(());
        };

        let scope = if notification_type.is_broadcast() {
            SubscriptionScope::Global
        } else {
            SubscriptionScope::Specific(entity_id)
        };
        let users = self.subscriptions.active_subscribers(kind, scope).await?;
        if users.is_empty() {
            info!(
                notification_type = notification_type.as_str(),
                "No recipients found"
            );
            return Ok(());
        }
        info!(
            notification_type = notification_type.as_str(),
            recipients = users.len(),
            "Sending notification"
        );

        let days_info = match record.get("days_remaining") {
            Some(days) => format!(" ({days} days left)"),
            None => String::new(),
        };

        let changes_description = match record.get("changed_fields") {
            None => String::new(),
            Some(raw) => match serde_json::from_str::<ChangedFields>(raw) {
                Ok(changes) => render_changes(&changes),
                Err(e) => {
                    warn!(
                        notification_type = notification_type.as_str(),
                        entity_id,
                        error = %e,
                        "Malformed changed_fields payload"
                    );
                    return Ok(());
                }
            },
        };

        let title = compose_title(notification_type, &entity, &days_info);
        let message = compose_message(notification_type, &entity, &days_info, &changes_description);
        let related_link = format!("{}/{}", self.site_url, entity.link_path());

        let mut failed: Vec<&User> = Vec::new();
        for user in &users {
            let delivered = self
                .delivery
                .deliver_with_retry(
                    user,
                    notification_type.as_str(),
                    &title,
                    &message,
                    &related_link,
                )
                .await;
            if !delivered {
                failed.push(user);
            }
        }

        if !failed.is_empty() {
            for user in &failed {
                let quarantined = FailedNotification {
                    notification_type: notification_type.as_str().to_string(),
                    user_id: user.id,
                    user_email: user.email.clone(),
                    entity_type: kind.as_str(),
                    entity_id,
                    entity_name: entity.name().to_string(),
                    title: title.clone(),
                    message: message.clone(),
                    related_link: related_link.clone(),
                };
                if let Err(e) = self
                    .broker
                    .append(dlq::DLQ_STREAM_KEY, &quarantined.to_record())
                    .await
                {
                    error!(
                        user_email = %user.email,
                        error = %e,
                        "Failed to append DLQ entry"
                    );
                }
            }
            warn!(count = failed.len(), "Sent failed notifications to DLQ");
        }

        Ok(())
    }

    async fn load_entity(
        &self,
        kind: EntityKind,
        id: i64,
    ) -> Result<Option<LoadedEntity>, StoreError> {
        Ok(match kind {
            EntityKind::Chapter => self.entities.chapter(id).await?.map(LoadedEntity::Chapter),
            EntityKind::Event => self.entities.event(id).await?.map(LoadedEntity::Event),
            EntityKind::Snapshot => self.entities.snapshot(id).await?.map(LoadedEntity::Snapshot),
        })
    }
}

fn compose_title(
    notification_type: NotificationType,
    entity: &LoadedEntity,
    days_info: &str,
) -> String {
    match notification_type {
        NotificationType::SnapshotPublished => {
            format!("New Snapshot Published: {}", entity.title())
        }
        NotificationType::ChapterCreated => format!("New Chapter Created: {}", entity.name()),
        NotificationType::ChapterUpdated => format!("Chapter Updated: {}", entity.name()),
        NotificationType::EventCreated => format!("New Event Published: {}", entity.name()),
        NotificationType::EventUpdated => format!("Event Updated: {}", entity.name()),
        NotificationType::EventDeadlineReminder => {
            format!("Event Deadline Approaching{}: {}", days_info, entity.name())
        }
    }
}

fn compose_message(
    notification_type: NotificationType,
    entity: &LoadedEntity,
    days_info: &str,
    changes_description: &str,
) -> String {
    match notification_type {
        NotificationType::SnapshotPublished => {
            format!("Check out the latest OWASP snapshot: {}", entity.title())
        }
        NotificationType::ChapterCreated => {
            format!("A new OWASP chapter has been created: {}", entity.name())
        }
        NotificationType::ChapterUpdated => {
            let base = format!("The OWASP chapter '{}' has been updated.", entity.name());
            with_changes(base, changes_description)
        }
        NotificationType::EventCreated => {
            format!("A new OWASP event has been published: {}", entity.name())
        }
        NotificationType::EventUpdated => {
            let base = format!("The OWASP event '{}' has been updated.", entity.name());
            with_changes(base, changes_description)
        }
        NotificationType::EventDeadlineReminder => format!(
            "Reminder: The OWASP event '{}' deadline is approaching{}.",
            entity.name(),
            days_info
        ),
    }
}

fn with_changes(base: String, changes_description: &str) -> String {
    if changes_description.is_empty() {
        base
    } else {
        format!("{base} Changes: {changes_description}")
    }
}

/// `Field Name: old → new | ...`, with `empty` standing in for null or
/// blank values
fn render_changes(changes: &ChangedFields) -> String {
    changes
        .iter()
        .map(|(field, change)| {
            let old = display_value(change.old.as_deref());
            let new = display_value(change.new.as_deref());
            format!("{}: {} → {}", humanize_field(field), old, new)
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

fn display_value(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => "empty",
    }
}

/// Underscore form to space-separated title case
fn humanize_field(field: &str) -> String {
    field
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
