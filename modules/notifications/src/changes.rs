//! Change detection at entity-commit boundaries
//!
//! The entity store's save path calls `prior_*_fields` before committing to
//! capture the row's whitelisted values, then hands them back to
//! `*_committed` after the commit. Creations publish a `*_created` event;
//! updates publish `*_updated` only when the normalized diff is non-empty.
//! A missing prior snapshot (replayed signal, row not yet visible) yields no
//! event at all.

use crate::models::{Chapter, Event};
use crate::publisher::{self, Trigger};
use crate::store::{EntityStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stream_broker::StreamBroker;

/// Chapter fields whose changes are worth notifying about
pub const CHAPTER_FIELDS: [&str; 5] =
    ["name", "country", "region", "suggested_location", "description"];

/// Event fields whose changes are worth notifying about
pub const EVENT_FIELDS: [&str; 6] = [
    "name",
    "start_date",
    "end_date",
    "suggested_location",
    "url",
    "description",
];

/// One field's transition. `None` stands for both absent and empty values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Diff over the whitelisted fields, keyed by field name
pub type ChangedFields = BTreeMap<String, FieldChange>;

/// Whitelisted field values captured at one commit boundary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldValues(BTreeMap<&'static str, Option<String>>);

/// Empty strings and absent values unify to the null sentinel
fn normalize(value: Option<&str>) -> Option<String> {
    match value {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        _ => None,
    }
}

/// A chapter's whitelisted fields, normalized for comparison
pub fn chapter_fields(chapter: &Chapter) -> FieldValues {
    let mut values = BTreeMap::new();
    values.insert("name", normalize(Some(chapter.name.as_str())));
    values.insert("country", normalize(chapter.country.as_deref()));
    values.insert("region", normalize(chapter.region.as_deref()));
    values.insert(
        "suggested_location",
        normalize(chapter.suggested_location.as_deref()),
    );
    values.insert("description", normalize(chapter.description.as_deref()));
    FieldValues(values)
}

/// An event's whitelisted fields, normalized for comparison.
/// Dates stringify to their ISO form.
pub fn event_fields(event: &Event) -> FieldValues {
    let mut values = BTreeMap::new();
    values.insert("name", normalize(Some(event.name.as_str())));
    values.insert("start_date", event.start_date.map(|d| d.to_string()));
    values.insert("end_date", event.end_date.map(|d| d.to_string()));
    values.insert(
        "suggested_location",
        normalize(event.suggested_location.as_deref()),
    );
    values.insert("url", normalize(event.url.as_deref()));
    values.insert("description", normalize(event.description.as_deref()));
    FieldValues(values)
}

/// Whitelisted fields whose normalized prior value differs from the current
/// one. Unchanged fields are absent from the result.
pub fn changed_fields(prior: &FieldValues, current: &FieldValues) -> ChangedFields {
    let mut changes = ChangedFields::new();
    for (field, new_value) in &current.0 {
        let old_value = prior.0.get(field).cloned().flatten();
        if old_value != *new_value {
            changes.insert(
                (*field).to_string(),
                FieldChange {
                    old: old_value,
                    new: new_value.clone(),
                },
            );
        }
    }
    changes
}

/// Pre-commit capture of a chapter's current row; `None` when the row does
/// not exist yet
pub async fn prior_chapter_fields(
    store: &dyn EntityStore,
    id: i64,
) -> Result<Option<FieldValues>, StoreError> {
    Ok(store.chapter(id).await?.map(|chapter| chapter_fields(&chapter)))
}

/// Pre-commit capture of an event's current row; `None` when the row does
/// not exist yet
pub async fn prior_event_fields(
    store: &dyn EntityStore,
    id: i64,
) -> Result<Option<FieldValues>, StoreError> {
    Ok(store.event(id).await?.map(|event| event_fields(&event)))
}

/// Post-commit hook for chapters
pub async fn chapter_committed(
    broker: &dyn StreamBroker,
    chapter: &Chapter,
    created: bool,
    prior: Option<&FieldValues>,
) {
    if created {
        publisher::publish_chapter_notification(broker, chapter, Trigger::Created, None).await;
        return;
    }

    let Some(prior) = prior else { return };
    let changes = changed_fields(prior, &chapter_fields(chapter));
    if !changes.is_empty() {
        publisher::publish_chapter_notification(broker, chapter, Trigger::Updated, Some(&changes))
            .await;
    }
}

/// Post-commit hook for events
pub async fn event_committed(
    broker: &dyn StreamBroker,
    event: &Event,
    created: bool,
    prior: Option<&FieldValues>,
) {
    if created {
        publisher::publish_event_notification(broker, event, Trigger::Created, None, None).await;
        return;
    }

    let Some(prior) = prior else { return };
    let changes = changed_fields(prior, &event_fields(event));
    if !changes.is_empty() {
        publisher::publish_event_notification(broker, event, Trigger::Updated, None, Some(&changes))
            .await;
    }
}
