//! In-memory implementation of the StreamBroker trait for testing and development

use crate::{AutoClaimed, BrokerError, BrokerResult, StreamBroker, StreamEntry, StreamRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// StreamBroker implementation using in-memory state
///
/// This implementation is suitable for:
/// - Unit tests (no external dependencies)
/// - Local development without Docker
/// - Integration tests that exercise consumer-group recovery paths
///
/// Unlike a plain channel fake, it models the parts of Redis Streams the
/// pipeline's correctness story depends on: broker-assigned monotonic ids,
/// per-group delivery cursors, the pending-entry list, and idle-based
/// auto-claim. Entry ids have the form `"{seq}-0"` with `seq` starting at 1
/// per stream.
///
/// Pending-entry idle times are measured with `tokio::time::Instant`, so
/// tests running under paused time can age entries deterministically.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    streams: HashMap<String, StreamState>,
}

#[derive(Default)]
struct StreamState {
    entries: Vec<(u64, StreamRecord)>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct GroupState {
    /// Highest sequence handed out through the `">"` cursor
    last_delivered: u64,
    pending: HashMap<u64, PendingEntry>,
}

struct PendingEntry {
    #[allow(dead_code)] // consumer identity is tracked but not queried yet
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

/// How often a blocking read re-checks for new entries
const BLOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

impl InMemoryBroker {
    /// Create a new in-memory broker with no streams
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently stored in `stream` (0 if absent).
    ///
    /// Test helper; Redis exposes this as `XLEN`.
    pub fn len(&self, stream: &str) -> usize {
        let state = self.inner.lock().expect("broker state poisoned");
        state.streams.get(stream).map_or(0, |s| s.entries.len())
    }

    /// Whether `stream` holds no entries
    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }

    /// Ids still pending (delivered, unacked) for `group` on `stream`,
    /// in id order. Test helper; Redis exposes this as `XPENDING`.
    pub fn pending_ids(&self, stream: &str, group: &str) -> Vec<String> {
        let state = self.inner.lock().expect("broker state poisoned");
        let Some(group) = state.streams.get(stream).and_then(|s| s.groups.get(group)) else {
            return Vec::new();
        };
        let mut seqs: Vec<u64> = group.pending.keys().copied().collect();
        seqs.sort_unstable();
        seqs.into_iter().map(format_id).collect()
    }

    /// Times an entry has been delivered to the group (0 if not pending)
    pub fn delivery_count(&self, stream: &str, group: &str, id: &str) -> u64 {
        let Some(seq) = parse_id(id) else { return 0 };
        let state = self.inner.lock().expect("broker state poisoned");
        state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .and_then(|g| g.pending.get(&seq))
            .map_or(0, |p| p.delivery_count)
    }
}

fn format_id(seq: u64) -> String {
    format!("{seq}-0")
}

fn parse_id(id: &str) -> Option<u64> {
    let seq = id.split('-').next()?;
    seq.parse().ok()
}

fn parse_range_bound(bound: &str, default: u64) -> u64 {
    match bound {
        "-" => 0,
        "+" => u64::MAX,
        other => parse_id(other).unwrap_or(default),
    }
}

#[async_trait]
impl StreamBroker for InMemoryBroker {
    async fn append(&self, stream: &str, record: &StreamRecord) -> BrokerResult<String> {
        let mut state = self.inner.lock().expect("broker state poisoned");
        let stream = state.streams.entry(stream.to_string()).or_default();

        stream.next_seq += 1;
        let seq = stream.next_seq;
        stream.entries.push((seq, record.clone()));

        Ok(format_id(seq))
    }

    async fn create_group(&self, stream: &str, group: &str) -> BrokerResult<bool> {
        let mut state = self.inner.lock().expect("broker state poisoned");
        // mkstream semantics: the stream comes into being with the group
        let stream = state.streams.entry(stream.to_string()).or_default();

        if stream.groups.contains_key(group) {
            return Ok(false);
        }
        stream.groups.insert(group.to_string(), GroupState::default());

        Ok(true)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> BrokerResult<Vec<StreamEntry>> {
        let deadline = Instant::now() + block;

        loop {
            {
                let mut state = self.inner.lock().expect("broker state poisoned");
                let stream_state = state
                    .streams
                    .get_mut(stream)
                    .ok_or_else(|| BrokerError::NoGroup(format!("no such stream '{stream}'")))?;

                let cursor = stream_state
                    .groups
                    .get(group)
                    .ok_or_else(|| {
                        BrokerError::NoGroup(format!("no group '{group}' on stream '{stream}'"))
                    })?
                    .last_delivered;

                let fresh: Vec<(u64, StreamRecord)> = stream_state
                    .entries
                    .iter()
                    .filter(|(seq, _)| *seq > cursor)
                    .take(count)
                    .cloned()
                    .collect();

                if !fresh.is_empty() {
                    let group_state = stream_state
                        .groups
                        .get_mut(group)
                        .expect("group checked above");
                    let now = Instant::now();
                    let mut delivered = Vec::with_capacity(fresh.len());
                    for (seq, record) in fresh {
                        group_state.last_delivered = seq;
                        group_state.pending.insert(
                            seq,
                            PendingEntry {
                                consumer: consumer.to_string(),
                                delivered_at: now,
                                delivery_count: 1,
                            },
                        );
                        delivered.push(StreamEntry {
                            id: format_id(seq),
                            record,
                        });
                    }
                    return Ok(delivered);
                }
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            sleep(BLOCK_POLL_INTERVAL).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> BrokerResult<()> {
        let Some(seq) = parse_id(id) else {
            return Ok(());
        };

        let mut state = self.inner.lock().expect("broker state poisoned");
        if let Some(group) = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        {
            group.pending.remove(&seq);
        }

        Ok(())
    }

    async fn delete(&self, stream: &str, id: &str) -> BrokerResult<()> {
        let Some(seq) = parse_id(id) else {
            return Ok(());
        };

        let mut state = self.inner.lock().expect("broker state poisoned");
        if let Some(stream) = state.streams.get_mut(stream) {
            stream.entries.retain(|(s, _)| *s != seq);
        }

        Ok(())
    }

    async fn range(
        &self,
        stream: &str,
        start: &str,
        end: &str,
    ) -> BrokerResult<Vec<StreamEntry>> {
        let start = parse_range_bound(start, u64::MAX);
        let end = parse_range_bound(end, 0);

        let state = self.inner.lock().expect("broker state poisoned");
        let Some(stream) = state.streams.get(stream) else {
            return Ok(Vec::new());
        };

        Ok(stream
            .entries
            .iter()
            .filter(|(seq, _)| *seq >= start && *seq <= end)
            .map(|(seq, record)| StreamEntry {
                id: format_id(*seq),
                record: record.clone(),
            })
            .collect())
    }

    async fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        start: &str,
        count: usize,
    ) -> BrokerResult<AutoClaimed> {
        let start_seq = parse_range_bound(start, 0);
        let now = Instant::now();

        let mut state = self.inner.lock().expect("broker state poisoned");
        let stream_state = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::NoGroup(format!("no such stream '{stream}'")))?;

        // Split borrows: entry lookup happens against a snapshot of ids
        let live: Vec<u64> = stream_state.entries.iter().map(|(seq, _)| *seq).collect();
        let records: HashMap<u64, StreamRecord> = stream_state.entries.iter().cloned().collect();

        let group_state = stream_state.groups.get_mut(group).ok_or_else(|| {
            BrokerError::NoGroup(format!("no group '{group}' on stream '{stream}'"))
        })?;

        let mut idle: Vec<u64> = group_state
            .pending
            .iter()
            .filter(|(seq, pending)| {
                **seq >= start_seq && now.duration_since(pending.delivered_at) >= min_idle
            })
            .map(|(seq, _)| *seq)
            .collect();
        idle.sort_unstable();

        let mut entries = Vec::new();
        let mut removed = Vec::new();
        let mut scanned = 0usize;
        let mut next_cursor = "0-0".to_string();

        for seq in idle {
            if scanned == count {
                next_cursor = format_id(seq);
                break;
            }
            scanned += 1;

            if live.contains(&seq) {
                let pending = group_state.pending.get_mut(&seq).expect("seq from pending");
                pending.consumer = consumer.to_string();
                pending.delivered_at = now;
                pending.delivery_count += 1;
                entries.push(StreamEntry {
                    id: format_id(seq),
                    record: records[&seq].clone(),
                });
            } else {
                // Dangling pending reference: entry was deleted from the stream
                tracing::debug!(stream, group, id = %format_id(seq), "Dropping deleted pending entry");
                group_state.pending.remove(&seq);
                removed.push(format_id(seq));
            }
        }

        Ok(AutoClaimed {
            next_cursor,
            entries,
            removed,
        })
    }
}
