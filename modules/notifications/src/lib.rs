//! # OWASP Notification Pipeline
//!
//! At-least-once notification delivery over a Redis Streams broker.
//!
//! Producers (entity-commit observers, the daily deadline scanner) publish
//! flat domain events onto the main stream; a long-running worker fans each
//! event out to subscribed users via email, records every successful
//! delivery in an append-only ledger (the idempotency source of truth), and
//! quarantines terminally failed deliveries in a dead-letter stream that an
//! operator CLI can list, retry, and evict.
//!
//! The broker itself lives behind the `stream-broker` platform crate; the
//! entity store, subscription directory, email transport, and ledger are
//! collaborators consumed through the traits in [`store`], [`mailer`], and
//! [`ledger`].

pub mod changes;
pub mod config;
pub mod deadlines;
pub mod delivery;
pub mod dispatch;
pub mod dlq;
pub mod ledger;
pub mod mailer;
pub mod models;
pub mod publisher;
pub mod store;
pub mod worker;
