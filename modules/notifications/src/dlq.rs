//! Dead-letter stream records and administrative operations

use crate::mailer::Mailer;
use chrono::Utc;
use std::sync::Arc;
use stream_broker::{BrokerError, StreamBroker, StreamEntry, StreamRecord};

/// Quarantine stream for undeliverable notifications
pub const DLQ_STREAM_KEY: &str = "owasp_notifications_dlq";

/// A notification whose retry budget is spent, ready to quarantine
#[derive(Debug, Clone)]
pub struct FailedNotification {
    pub notification_type: String,
    pub user_id: i64,
    pub user_email: String,
    pub entity_type: &'static str,
    pub entity_id: i64,
    pub entity_name: String,
    pub title: String,
    pub message: String,
    pub related_link: String,
}

impl FailedNotification {
    /// The DLQ wire form; `dlq_retries` starts at zero
    pub fn to_record(&self) -> StreamRecord {
        StreamRecord::new()
            .with("type", "failed_notification")
            .with("notification_type", self.notification_type.as_str())
            .with("user_id", self.user_id.to_string())
            .with("user_email", self.user_email.as_str())
            .with("entity_type", self.entity_type)
            .with("entity_id", self.entity_id.to_string())
            .with("entity_name", self.entity_name.as_str())
            .with("title", self.title.as_str())
            .with("message", self.message.as_str())
            .with("related_link", self.related_link.as_str())
            .with("timestamp", Utc::now().timestamp().to_string())
            .with("dlq_retries", "0")
    }
}

/// Record for a main-stream entry that failed again during PEL recovery
pub fn recovery_failed_record(message_id: &str, error: &str) -> StreamRecord {
    StreamRecord::new()
        .with("type", "recovery_failed")
        .with("message_id", message_id)
        .with("error", error)
        .with("timestamp", Utc::now().timestamp().to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// One row of the operator's `list` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlqListing {
    pub id: String,
    pub user_email: String,
    pub notification_type: String,
    pub entity_name: String,
    pub dlq_retries: String,
}

/// Outcome counters for one retry pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetrySummary {
    pub succeeded: u32,
    /// Send failures plus entries skipped for missing fields
    pub failed: u32,
}

/// Which DLQ entries an operation targets
#[derive(Debug, Clone)]
pub enum DlqSelector {
    Entry(String),
    All,
}

/// Out-of-band operations over the dead-letter stream
pub struct DlqAdmin {
    broker: Arc<dyn StreamBroker>,
    mailer: Arc<dyn Mailer>,
}

impl DlqAdmin {
    pub fn new(broker: Arc<dyn StreamBroker>, mailer: Arc<dyn Mailer>) -> Self {
        Self { broker, mailer }
    }

    async fn select(&self, selector: &DlqSelector) -> Result<Vec<StreamEntry>, DlqError> {
        let entries = match selector {
            DlqSelector::All => self.broker.range(DLQ_STREAM_KEY, "-", "+").await?,
            DlqSelector::Entry(id) => self.broker.range(DLQ_STREAM_KEY, id, id).await?,
        };
        Ok(entries)
    }

    /// Rows for the operator table, oldest first
    pub async fn list(&self) -> Result<Vec<DlqListing>, DlqError> {
        let entries = self.broker.range(DLQ_STREAM_KEY, "-", "+").await?;

        Ok(entries
            .iter()
            .map(|entry| DlqListing {
                id: entry.id.clone(),
                user_email: field_or(entry, "user_email", "unknown"),
                notification_type: field_or(entry, "notification_type", "unknown"),
                entity_name: truncate(&field_or(entry, "entity_name", "unknown"), 15),
                dlq_retries: field_or(entry, "dlq_retries", "0"),
            })
            .collect())
    }

    /// Resend targeted entries. A successful send deletes the entry; a
    /// failed send replaces it with a copy whose `dlq_retries` is one
    /// higher. Entries missing any of user_email/title/message are skipped.
    ///
    /// Returns `None` when the selector matched nothing.
    pub async fn retry(&self, selector: &DlqSelector) -> Result<Option<RetrySummary>, DlqError> {
        let entries = self.select(selector).await?;
        if entries.is_empty() {
            return Ok(None);
        }

        let mut summary = RetrySummary::default();

        for entry in entries {
            let email = entry.record.get("user_email").filter(|v| !v.is_empty());
            let title = entry.record.get("title").filter(|v| !v.is_empty());
            let message = entry.record.get("message").filter(|v| !v.is_empty());

            let (Some(email), Some(title), Some(message)) = (email, title, message) else {
                println!("Skipped (missing data): {}", entry.id);
                summary.failed += 1;
                continue;
            };

            let related_link = entry.record.get("related_link").unwrap_or_default();
            let body = if related_link.is_empty() {
                message.to_string()
            } else {
                format!("{message}\n\nView: {related_link}")
            };

            match self.mailer.send(email, title, &body).await {
                Ok(()) => {
                    self.broker.delete(DLQ_STREAM_KEY, &entry.id).await?;
                    summary.succeeded += 1;
                    println!("Retried: {} -> {}", entry.id, email);
                }
                Err(e) => {
                    summary.failed += 1;
                    let retries: u32 = entry
                        .record
                        .get("dlq_retries")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);

                    let mut requeued = entry.record.clone();
                    requeued.set("dlq_retries", (retries + 1).to_string());
                    self.broker.delete(DLQ_STREAM_KEY, &entry.id).await?;
                    self.broker.append(DLQ_STREAM_KEY, &requeued).await?;

                    println!("Failed to retry {}: {e}, incremented retries", entry.id);
                }
            }
        }

        Ok(Some(summary))
    }

    /// Unconditionally delete targeted entries. Returns `None` when the
    /// selector matched nothing.
    pub async fn remove(&self, selector: &DlqSelector) -> Result<Option<u32>, DlqError> {
        let entries = self.select(selector).await?;
        if entries.is_empty() {
            return Ok(None);
        }

        let mut count = 0;
        for entry in entries {
            self.broker.delete(DLQ_STREAM_KEY, &entry.id).await?;
            count += 1;
            println!("Removed: {}", entry.id);
        }

        Ok(Some(count))
    }
}

fn field_or(entry: &StreamEntry, key: &str, default: &str) -> String {
    match entry.record.get(key) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => default.to_string(),
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_notification_record_fields() {
        let failed = FailedNotification {
            notification_type: "event_updated".to_string(),
            user_id: 7,
            user_email: "user@example.com".to_string(),
            entity_type: "event",
            entity_id: 10,
            entity_name: "AppSec".to_string(),
            title: "Event Updated: AppSec".to_string(),
            message: "The OWASP event 'AppSec' has been updated.".to_string(),
            related_link: "https://nest.owasp.org/events/10".to_string(),
        };

        let record = failed.to_record();
        assert_eq!(record.get("type"), Some("failed_notification"));
        assert_eq!(record.get("notification_type"), Some("event_updated"));
        assert_eq!(record.get("user_id"), Some("7"));
        assert_eq!(record.get("user_email"), Some("user@example.com"));
        assert_eq!(record.get("entity_type"), Some("event"));
        assert_eq!(record.get("entity_id"), Some("10"));
        assert_eq!(record.get("entity_name"), Some("AppSec"));
        assert_eq!(record.get("dlq_retries"), Some("0"));
        assert!(record.get("timestamp").is_some());
    }

    #[test]
    fn test_recovery_failed_record_fields() {
        let record = recovery_failed_record("3-0", "store unavailable");
        assert_eq!(record.get("type"), Some("recovery_failed"));
        assert_eq!(record.get("message_id"), Some("3-0"));
        assert_eq!(record.get("error"), Some("store unavailable"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("Gdańsk Chapter Meetup", 15), "Gdańsk Chapter ");
        assert_eq!(truncate("short", 15), "short");
    }
}
