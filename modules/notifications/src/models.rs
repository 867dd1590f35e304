use chrono::NaiveDate;
use std::fmt;

// ============================================================================
// DOMAIN ENTITIES (read-only views onto the entity store)
// ============================================================================

/// An OWASP chapter as read from the entity store
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Chapter {
    pub id: i64,
    pub name: String,
    pub country: Option<String>,
    pub region: Option<String>,
    pub suggested_location: Option<String>,
    pub description: Option<String>,
}

/// An OWASP event as read from the entity store
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Event {
    pub id: i64,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub suggested_location: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
}

/// A published community snapshot
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Snapshot {
    pub id: i64,
    pub title: String,
    pub key: String,
}

/// A subscriber from the user directory
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub is_active: bool,
}

// ============================================================================
// SUBSCRIPTION TARGETING
// ============================================================================

/// The three entity kinds subscriptions can reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Chapter,
    Event,
    Snapshot,
}

impl EntityKind {
    /// The directory's content-type tag for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Chapter => "chapter",
            EntityKind::Event => "event",
            EntityKind::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which subscribers of a kind an event addresses.
///
/// The subscription directory encodes "all entities of this kind" as
/// `object_id = 0`; that sentinel stays at the directory boundary and the
/// core works with this variant instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionScope {
    /// Every entity of the kind (the directory's `object_id = 0` rows)
    Global,
    /// One specific entity
    Specific(i64),
}

impl SubscriptionScope {
    /// The directory's `object_id` encoding of this scope
    pub fn object_id(&self) -> i64 {
        match self {
            SubscriptionScope::Global => 0,
            SubscriptionScope::Specific(id) => *id,
        }
    }
}
