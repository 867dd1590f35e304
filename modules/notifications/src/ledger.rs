//! Append-only record of successful deliveries
//!
//! The ledger is the source of truth for idempotency: before any send, the
//! delivery engine probes it with the (recipient, type, related_link,
//! message) tuple, and a hit short-circuits the delivery. No deletion path
//! is exposed.

use async_trait::async_trait;
use sqlx::PgPool;

/// The tuple that identifies one logical delivery
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryKey {
    pub recipient_id: i64,
    pub notification_type: String,
    pub related_link: String,
    pub message: String,
}

/// A receipt appended after a successful send
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub recipient_id: i64,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub related_link: String,
}

impl DeliveryReceipt {
    /// The idempotency tuple this receipt satisfies
    pub fn key(&self) -> DeliveryKey {
        DeliveryKey {
            recipient_id: self.recipient_id,
            notification_type: self.notification_type.clone(),
            related_link: self.related_link.clone(),
            message: self.message.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable delivery receipts, queryable by the idempotency tuple
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    async fn was_delivered(&self, key: &DeliveryKey) -> Result<bool, LedgerError>;

    async fn record(&self, receipt: &DeliveryReceipt) -> Result<(), LedgerError>;
}

/// Postgres-backed ledger over the notifications table
pub struct PgNotificationLedger {
    pool: PgPool,
}

impl PgNotificationLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationLedger for PgNotificationLedger {
    async fn was_delivered(&self, key: &DeliveryKey) -> Result<bool, LedgerError> {
        #[derive(sqlx::FromRow)]
        struct Existing {
            #[allow(dead_code)]
            id: i64,
        }

        let existing: Option<Existing> = sqlx::query_as(
            r#"
            SELECT id FROM owasp_notifications
            WHERE recipient_id = $1
              AND type = $2
              AND related_link = $3
              AND message = $4
            LIMIT 1
            "#,
        )
        .bind(key.recipient_id)
        .bind(&key.notification_type)
        .bind(&key.related_link)
        .bind(&key.message)
        .fetch_optional(&self.pool)
        .await?;

        Ok(existing.is_some())
    }

    async fn record(&self, receipt: &DeliveryReceipt) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO owasp_notifications (recipient_id, type, title, message, related_link, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(receipt.recipient_id)
        .bind(&receipt.notification_type)
        .bind(&receipt.title)
        .bind(&receipt.message)
        .bind(&receipt.related_link)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
