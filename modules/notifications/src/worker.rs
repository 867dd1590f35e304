//! Long-running stream consumer: group management, PEL recovery, and the
//! steady-state dispatch loop

use crate::dispatch::Dispatcher;
use crate::dlq;
use crate::publisher::STREAM_KEY;
use std::sync::Arc;
use std::time::Duration;
use stream_broker::{BrokerError, StreamBroker};
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Consumer group all worker processes join
pub const GROUP_NAME: &str = "notification_group";

/// Entries idle in the PEL at least this long are reclaimed at startup
pub const RECOVERY_MIN_IDLE: Duration = Duration::from_millis(300_000);

/// How many stuck entries one startup recovery pass claims
const RECOVERY_BATCH: usize = 10;

const READ_BLOCK: Duration = Duration::from_millis(5000);
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Single-process consumer bound to the notification group.
///
/// Crash safety comes entirely from ack-after-dispatch: an entry is
/// acknowledged only once the router reported it handled, so a kill at any
/// point leaves in-flight entries in the PEL for the next startup's
/// recovery pass. There is no graceful-shutdown path.
pub struct NotificationWorker {
    broker: Arc<dyn StreamBroker>,
    dispatcher: Dispatcher,
    consumer_name: String,
}

impl NotificationWorker {
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        dispatcher: Dispatcher,
        consumer_name: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            dispatcher,
            consumer_name: consumer_name.into(),
        }
    }

    /// Run until killed: ensure the group, drain stuck PEL entries, then
    /// consume new entries forever
    pub async fn run(&self) {
        println!("Starting notification worker...");
        self.ensure_consumer_group().await;
        self.recover_pending_messages().await;

        loop {
            self.poll().await;
        }
    }

    /// Idempotently create the consumer group (from the stream's start,
    /// creating the stream if needed)
    pub async fn ensure_consumer_group(&self) {
        match self.broker.create_group(STREAM_KEY, GROUP_NAME).await {
            Ok(true) => println!("Consumer group '{GROUP_NAME}' created."),
            Ok(false) => println!("Consumer group '{GROUP_NAME}' already exists."),
            Err(e) => println!("Error creating group: {e}"),
        }
    }

    /// Reclaim and reprocess entries stuck in the PEL.
    ///
    /// Entries that fail again here are quarantined as `recovery_failed`
    /// and acked anyway, so a poison message cannot pin the PEL. A failed
    /// quarantine write is logged and the ack still happens.
    pub async fn recover_pending_messages(&self) {
        println!("Checking for stuck messages in PEL...");

        let claimed = match self
            .broker
            .auto_claim(
                STREAM_KEY,
                GROUP_NAME,
                &self.consumer_name,
                RECOVERY_MIN_IDLE,
                "0-0",
                RECOVERY_BATCH,
            )
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(error = %e, "Error checking PEL for stuck messages");
                return;
            }
        };

        if claimed.entries.is_empty() {
            println!("No stuck messages found.");
            return;
        }

        for entry in claimed.entries {
            println!("Recovering stuck message: {}", entry.id);

            match self.dispatcher.dispatch(&entry.record).await {
                Ok(()) => println!("Successfully recovered message {}", entry.id),
                Err(e) => {
                    error!(message_id = %entry.id, error = %e, "Failed to recover message");
                    let record = dlq::recovery_failed_record(&entry.id, &e.to_string());
                    if let Err(e) = self.broker.append(dlq::DLQ_STREAM_KEY, &record).await {
                        error!(
                            message_id = %entry.id,
                            error = %e,
                            "Failed to quarantine unrecoverable message"
                        );
                    }
                }
            }

            if let Err(e) = self.broker.ack(STREAM_KEY, GROUP_NAME, &entry.id).await {
                error!(message_id = %entry.id, error = %e, "Failed to ack recovered message");
            }
        }
    }

    /// One pass of the steady-state loop: read, dispatch, ack
    pub async fn poll(&self) {
        let read = self
            .broker
            .read_group(STREAM_KEY, GROUP_NAME, &self.consumer_name, 1, READ_BLOCK)
            .await;

        match read {
            Ok(entries) => {
                for entry in entries {
                    match self.dispatcher.dispatch(&entry.record).await {
                        Ok(()) => {
                            match self.broker.ack(STREAM_KEY, GROUP_NAME, &entry.id).await {
                                Ok(()) => {
                                    info!(message_id = %entry.id, "Message processed successfully")
                                }
                                Err(e) => error!(
                                    message_id = %entry.id,
                                    error = %e,
                                    "Failed to ack message"
                                ),
                            }
                        }
                        // Left unacked: PEL recovery picks it up after a restart
                        Err(e) => {
                            error!(message_id = %entry.id, error = %e, "Error processing message")
                        }
                    }
                }
            }
            Err(BrokerError::NoGroup(_)) => {
                warn!("Consumer group missing, attempting to recreate...");
                self.ensure_consumer_group().await;
                sleep(READ_ERROR_BACKOFF).await;
            }
            Err(e) => {
                error!(error = %e, "Error reading from stream group");
                sleep(READ_ERROR_BACKOFF).await;
            }
        }
    }
}
