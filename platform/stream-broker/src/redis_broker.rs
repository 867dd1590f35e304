//! Redis Streams implementation of the StreamBroker trait

use crate::{AutoClaimed, BrokerError, BrokerResult, StreamBroker, StreamEntry, StreamRecord};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamRangeReply, StreamReadOptions,
    StreamReadReply,
};
use redis::AsyncCommands;
use std::time::Duration;

/// StreamBroker implementation backed by Redis Streams
///
/// This is the production implementation. It wraps a
/// [`redis::aio::ConnectionManager`], which multiplexes one connection
/// across clones and reconnects transparently, so a single `RedisBroker`
/// can be shared process-wide.
///
/// # Example
/// ```rust,no_run
/// use stream_broker::{RedisBroker, StreamBroker, StreamRecord};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = RedisBroker::connect("redis://localhost:6379").await?;
/// let record = StreamRecord::new().with("type", "snapshot_published");
/// broker.append("owasp_notifications", &record).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
}

impl RedisBroker {
    /// Connect to Redis at `url` (e.g. `redis://localhost:6379`)
    pub async fn connect(url: &str) -> BrokerResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| BrokerError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Self { conn })
    }

    fn command_error(err: redis::RedisError) -> BrokerError {
        let text = err.to_string();
        if text.contains("NOGROUP") {
            BrokerError::NoGroup(text)
        } else {
            BrokerError::Command(text)
        }
    }

    /// Decode one raw entry, turning every field value into text
    fn decode_entry(id: &StreamId) -> BrokerResult<StreamEntry> {
        let mut record = StreamRecord::new();
        for (key, value) in &id.map {
            let text: String = redis::from_redis_value(value)
                .map_err(|e| BrokerError::Reply(format!("field '{key}': {e}")))?;
            record.set(key.clone(), text);
        }

        Ok(StreamEntry {
            id: id.id.clone(),
            record,
        })
    }
}

#[async_trait]
impl StreamBroker for RedisBroker {
    async fn append(&self, stream: &str, record: &StreamRecord) -> BrokerResult<String> {
        let pairs: Vec<(&str, &str)> = record.iter().collect();
        let mut conn = self.conn.clone();

        let id: String = conn
            .xadd(stream, "*", &pairs)
            .await
            .map_err(Self::command_error)?;

        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str) -> BrokerResult<bool> {
        let mut conn = self.conn.clone();

        // XGROUP CREATE ... 0 MKSTREAM; BUSYGROUP means it already exists
        let created: Result<String, redis::RedisError> =
            conn.xgroup_create_mkstream(stream, group, "0").await;

        match created {
            Ok(_) => Ok(true),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                tracing::debug!(stream, group, "Consumer group already exists");
                Ok(false)
            }
            Err(e) => Err(Self::command_error(e)),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> BrokerResult<Vec<StreamEntry>> {
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);
        let mut conn = self.conn.clone();

        // ">" = entries never delivered to any consumer of this group.
        // An elapsed BLOCK yields a nil reply, hence the Option.
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[stream], &[">"], &opts)
            .await
            .map_err(Self::command_error)?;

        let mut entries = Vec::new();
        if let Some(reply) = reply {
            for key in &reply.keys {
                for id in &key.ids {
                    entries.push(Self::decode_entry(id)?);
                }
            }
        }

        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> BrokerResult<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn
            .xack(stream, group, &[id])
            .await
            .map_err(Self::command_error)?;

        Ok(())
    }

    async fn delete(&self, stream: &str, id: &str) -> BrokerResult<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.xdel(stream, &[id]).await.map_err(Self::command_error)?;

        Ok(())
    }

    async fn range(
        &self,
        stream: &str,
        start: &str,
        end: &str,
    ) -> BrokerResult<Vec<StreamEntry>> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn
            .xrange(stream, start, end)
            .await
            .map_err(Self::command_error)?;

        reply.ids.iter().map(Self::decode_entry).collect()
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
        let opts = StreamAutoClaimOptions::default().count(count);
        let mut conn = self.conn.clone();

        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(
                stream,
                group,
                consumer,
                min_idle.as_millis() as usize,
                start,
                opts,
            )
            .await
            .map_err(Self::command_error)?;

        let entries = reply
            .claimed
            .iter()
            .map(Self::decode_entry)
            .collect::<BrokerResult<Vec<_>>>()?;

        Ok(AutoClaimed {
            next_cursor: reply.next_stream_id,
            entries,
            removed: reply.deleted_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a running Redis server
    // For CI, use InMemoryBroker tests instead
    // For manual testing: docker run -p 6379:6379 redis:7-alpine

    #[tokio::test]
    #[ignore] // Requires Redis server
    async fn test_append_read_ack_cycle() {
        let broker = RedisBroker::connect("redis://localhost:6379")
            .await
            .expect("Redis must be running on localhost:6379");

        let stream = "test_stream_broker_cycle";
        broker.create_group(stream, "test_group").await.unwrap();

        let record = StreamRecord::new().with("type", "ping").with("n", "1");
        let id = broker.append(stream, &record).await.unwrap();

        let entries = broker
            .read_group(stream, "test_group", "tester", 10, Duration::from_secs(1))
            .await
            .unwrap();
        let entry = entries
            .iter()
            .find(|e| e.id == id)
            .expect("appended entry should be delivered");
        assert_eq!(entry.record.get("type"), Some("ping"));

        broker.ack(stream, "test_group", &id).await.unwrap();
        broker.delete(stream, &id).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis server
    async fn test_create_group_is_idempotent() {
        let broker = RedisBroker::connect("redis://localhost:6379")
            .await
            .expect("Redis must be running on localhost:6379");

        let stream = "test_stream_broker_group";
        let first = broker.create_group(stream, "dup_group").await.unwrap();
        let second = broker.create_group(stream, "dup_group").await.unwrap();

        assert!(first || !second, "second create must report already-exists");
        assert!(!second);
    }
}
