//! # Stream Broker Abstraction
//!
//! A platform-level facade over a log-structured stream broker
//! (Redis Streams) exposing the minimal primitives the notification
//! pipeline needs: append, consumer-group reads, acknowledgement,
//! deletion, range scans, and idle-entry auto-claim.
//!
//! ## Why This Lives in Tier 1
//!
//! The broker is a **shared runtime capability**: producers append domain
//! events, the worker consumes them through a consumer group, and the DLQ
//! administrator scans and edits the dead-letter stream. Placing the facade
//! in `platform/` keeps modules free of any direct `redis` dependency and
//! allows a config-driven swap between Redis (production) and InMemory
//! (dev/test).
//!
//! ## Implementations
//!
//! - **RedisBroker**: production implementation over Redis Streams
//! - **InMemoryBroker**: test/dev implementation with real consumer-group
//!   and pending-entry semantics
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stream_broker::{InMemoryBroker, StreamBroker, StreamRecord};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = InMemoryBroker::new();
//!
//! let record = StreamRecord::new()
//!     .with("type", "chapter_created")
//!     .with("chapter_id", "5");
//! broker.append("owasp_notifications", &record).await?;
//!
//! broker.create_group("owasp_notifications", "notification_group").await?;
//! let entries = broker
//!     .read_group(
//!         "owasp_notifications",
//!         "notification_group",
//!         "worker_1",
//!         1,
//!         Duration::from_secs(5),
//!     )
//!     .await?;
//! for entry in entries {
//!     broker.ack("owasp_notifications", "notification_group", &entry.id).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod inmemory_broker;
mod redis_broker;

pub use inmemory_broker::InMemoryBroker;
pub use redis_broker::RedisBroker;

use async_trait::async_trait;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A flat mapping of string keys to string values, as stored in one stream
/// entry. Nested structures (e.g. changed-field diffs) travel as JSON-encoded
/// string values; the broker never interprets them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamRecord {
    fields: BTreeMap<String, String>,
}

impl StreamRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, builder style
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Set a field in place
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Look up a field
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Iterate over all fields in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<'a> IntoIterator for &'a StreamRecord {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl FromIterator<(String, String)> for StreamRecord {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// An entry read back from a stream: the broker-assigned monotonic id plus
/// its record, decoded to text.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub record: StreamRecord,
}

/// Result of an auto-claim scan over a group's pending entries.
#[derive(Debug, Clone)]
pub struct AutoClaimed {
    /// Cursor to resume the scan from; `"0-0"` when the scan is complete
    pub next_cursor: String,
    /// Entries reassigned to the claiming consumer
    pub entries: Vec<StreamEntry>,
    /// Ids that were pending but no longer exist in the stream
    pub removed: Vec<String>,
}

/// Errors that can occur when talking to the broker
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("consumer group missing: {0}")]
    NoGroup(String),

    #[error("malformed broker reply: {0}")]
    Reply(String),
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Minimal stream primitives the notification pipeline consumes.
///
/// Values are opaque byte strings on the wire; implementations decode on
/// read and encode on write so callers only ever see `String`s.
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Append a record to a stream, creating the stream if needed.
    ///
    /// Returns the broker-assigned entry id.
    async fn append(&self, stream: &str, record: &StreamRecord) -> BrokerResult<String>;

    /// Ensure a consumer group exists on a stream, creating the stream if
    /// needed (`MKSTREAM`) and reading from the beginning (`"0"`).
    ///
    /// Idempotent: a "group already exists" reply is swallowed. Returns
    /// `true` when the group was created by this call, `false` when it
    /// already existed.
    async fn create_group(&self, stream: &str, group: &str) -> BrokerResult<bool>;

    /// Read entries never delivered to any consumer of `group` (the `">"`
    /// cursor), assigning them to `consumer`'s pending list.
    ///
    /// Blocks up to `block` when no entry is available; an elapsed block
    /// yields an empty vec, not an error.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> BrokerResult<Vec<StreamEntry>>;

    /// Acknowledge a delivered entry, removing it from the group's
    /// pending-entry list.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> BrokerResult<()>;

    /// Delete an entry from the stream by id.
    async fn delete(&self, stream: &str, id: &str) -> BrokerResult<()>;

    /// Scan entries in `[start, end]` id order. `"-"` and `"+"` denote the
    /// stream's minimum and maximum ids.
    async fn range(&self, stream: &str, start: &str, end: &str)
        -> BrokerResult<Vec<StreamEntry>>;

    /// Reassign up to `count` pending entries idle for at least `min_idle`
    /// to `consumer`, starting the scan at `start`.
    ///
    /// Pending ids whose entry has since been deleted are dropped from the
    /// pending list and reported in [`AutoClaimed::removed`].
    async fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        start: &str,
        count: usize,
    ) -> BrokerResult<AutoClaimed>;
}

impl fmt::Debug for dyn StreamBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamBroker")
    }
}
