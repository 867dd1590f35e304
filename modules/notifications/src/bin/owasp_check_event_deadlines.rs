//! Once-per-day scan queueing deadline reminders for events starting in
//! 7, 3, or 1 days.

use anyhow::Context;
use chrono::Local;
use nest_notifications::config::Config;
use nest_notifications::deadlines::check_event_deadlines;
use nest_notifications::store::PgEntityStore;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use stream_broker::RedisBroker;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    println!("Checking for approaching event deadlines...");

    let db = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    let store = PgEntityStore::new(db);

    let broker = RedisBroker::connect(&config.redis_url)
        .await
        .context("Failed to connect to Redis")?;

    let today = Local::now().date_naive();
    let queued = check_event_deadlines(&store, &broker, today)
        .await
        .context("Failed to scan event deadlines")?;

    for reminder in &queued {
        println!(
            "  Event '{}' starts in {} days ({})",
            reminder.event_name, reminder.days_remaining, reminder.start_date
        );
    }
    println!("Queued {} deadline reminder(s).", queued.len());

    Ok(())
}
