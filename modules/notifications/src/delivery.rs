//! Per-recipient delivery with idempotency and exponential-backoff retry

use crate::ledger::{DeliveryKey, DeliveryReceipt, LedgerError, NotificationLedger};
use crate::mailer::{MailError, Mailer};
use crate::models::User;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Retry attempts after the initial send
pub const MAX_RETRIES: u32 = 5;
/// First backoff delay, in seconds
pub const BASE_DELAY_SECS: u64 = 2;
/// Growth factor between consecutive delays
pub const DELAY_MULTIPLIER: u64 = 2;

#[derive(Debug, thiserror::Error)]
enum DeliveryError {
    #[error(transparent)]
    Mail(#[from] MailError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Idempotent per-recipient sender.
///
/// Callers deliver recipients sequentially; the idempotency probe runs on
/// every attempt, so re-dispatching the same stream entry (or fanning out
/// in parallel, should that ever happen) cannot double-send.
pub struct DeliveryEngine {
    mailer: Arc<dyn Mailer>,
    ledger: Arc<dyn NotificationLedger>,
}

impl DeliveryEngine {
    pub fn new(mailer: Arc<dyn Mailer>, ledger: Arc<dyn NotificationLedger>) -> Self {
        Self { mailer, ledger }
    }

    /// Deliver one notification, retrying failures with exponential
    /// backoff (2, 4, 8, 16, 32 s). Returns `false` once the retry budget
    /// is spent; the caller owns the DLQ hand-off.
    pub async fn deliver_with_retry(
        &self,
        user: &User,
        notification_type: &str,
        title: &str,
        message: &str,
        related_link: &str,
    ) -> bool {
        let mut retry_count: u32 = 0;

        loop {
            match self
                .deliver_once(user, notification_type, title, message, related_link)
                .await
            {
                Ok(()) => {
                    if retry_count > 0 {
                        info!(
                            email = %user.email,
                            retries = retry_count,
                            "Email succeeded after retries"
                        );
                    }
                    return true;
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > MAX_RETRIES {
                        error!(
                            email = %user.email,
                            retries = MAX_RETRIES,
                            error = %e,
                            "Email failed after max retries"
                        );
                        return false;
                    }

                    let delay_secs = BASE_DELAY_SECS * DELAY_MULTIPLIER.pow(retry_count - 1);
                    warn!(
                        email = %user.email,
                        attempt = retry_count,
                        max_attempts = MAX_RETRIES,
                        delay_secs,
                        error = %e,
                        "Email failed, retrying with backoff"
                    );
                    sleep(Duration::from_secs(delay_secs)).await;
                }
            }
        }
    }

    /// One attempt: probe the ledger, send, append the receipt.
    ///
    /// A ledger hit is a silent success; this is what makes at-least-once
    /// redelivery safe.
    async fn deliver_once(
        &self,
        user: &User,
        notification_type: &str,
        title: &str,
        message: &str,
        related_link: &str,
    ) -> Result<(), DeliveryError> {
        let key = DeliveryKey {
            recipient_id: user.id,
            notification_type: notification_type.to_string(),
            related_link: related_link.to_string(),
            message: message.to_string(),
        };

        if self.ledger.was_delivered(&key).await? {
            info!(
                email = %user.email,
                notification_type,
                "Already notified, skipping"
            );
            return Ok(());
        }

        self.mailer.send(&user.email, title, message).await?;
        info!(email = %user.email, notification_type, "Sent notification email");

        self.ledger
            .record(&DeliveryReceipt {
                recipient_id: user.id,
                notification_type: notification_type.to_string(),
                title: title.to_string(),
                message: message.to_string(),
                related_link: related_link.to_string(),
            })
            .await?;

        Ok(())
    }
}
