//! Long-running notification worker over the main stream. Runs until
//! killed; crash recovery happens through the consumer group's PEL.

use anyhow::Context;
use nest_notifications::config::Config;
use nest_notifications::delivery::DeliveryEngine;
use nest_notifications::dispatch::Dispatcher;
use nest_notifications::ledger::{NotificationLedger, PgNotificationLedger};
use nest_notifications::mailer::{Mailer, SmtpMailer};
use nest_notifications::store::{
    EntityStore, PgEntityStore, PgSubscriptionDirectory, SubscriptionDirectory,
};
use nest_notifications::worker::NotificationWorker;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use stream_broker::{RedisBroker, StreamBroker};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let db = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;

    let broker: Arc<dyn StreamBroker> = Arc::new(
        RedisBroker::connect(&config.redis_url)
            .await
            .context("Failed to connect to Redis")?,
    );
    let mailer: Arc<dyn Mailer> = Arc::new(
        SmtpMailer::new(&config.smtp_host, config.smtp_port, config.smtp_credentials())
            .context("Failed to build SMTP transport")?,
    );

    let entities: Arc<dyn EntityStore> = Arc::new(PgEntityStore::new(db.clone()));
    let subscriptions: Arc<dyn SubscriptionDirectory> =
        Arc::new(PgSubscriptionDirectory::new(db.clone()));
    let ledger: Arc<dyn NotificationLedger> = Arc::new(PgNotificationLedger::new(db));

    let delivery = DeliveryEngine::new(mailer, ledger);
    let dispatcher = Dispatcher::new(
        entities,
        subscriptions,
        delivery,
        broker.clone(),
        config.site_url.clone(),
    );
    let worker = NotificationWorker::new(broker, dispatcher, config.consumer_name.clone());

    worker.run().await;

    Ok(())
}
