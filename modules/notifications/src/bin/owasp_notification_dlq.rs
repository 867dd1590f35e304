//! Operator CLI over the notification dead-letter stream.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use nest_notifications::config::Config;
use nest_notifications::dlq::{DlqAdmin, DlqListing, DlqSelector};
use nest_notifications::mailer::{Mailer, SmtpMailer};
use std::sync::Arc;
use stream_broker::{RedisBroker, StreamBroker};
use tracing_subscriber::EnvFilter;

/// Manage the notification DLQ: list, retry, or remove failed notifications
#[derive(Parser)]
#[command(name = "owasp_notification_dlq")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all failed notifications in the DLQ
    List,
    /// Resend failed notification(s)
    Retry(Target),
    /// Delete failed notification(s)
    Remove(Target),
}

#[derive(Args)]
struct Target {
    /// Specific message ID to act on
    #[arg(long)]
    id: Option<String>,
    /// Apply the action to all messages
    #[arg(long)]
    all: bool,
}

impl Target {
    /// `--all` wins when both flags are present; neither is a usage error
    fn selector(&self, action: &str) -> DlqSelector {
        if self.all {
            DlqSelector::All
        } else if let Some(id) = &self.id {
            DlqSelector::Entry(id.clone())
        } else {
            eprintln!("Error: --id or --all is required for {action}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let broker: Arc<dyn StreamBroker> = Arc::new(
        RedisBroker::connect(&config.redis_url)
            .await
            .context("Failed to connect to Redis")?,
    );
    let mailer: Arc<dyn Mailer> = Arc::new(
        SmtpMailer::new(&config.smtp_host, config.smtp_port, config.smtp_credentials())
            .context("Failed to build SMTP transport")?,
    );
    let admin = DlqAdmin::new(broker, mailer);

    match cli.command {
        Command::List => {
            let rows = admin.list().await?;
            print_table(&rows);
        }
        Command::Retry(target) => {
            let selector = target.selector("retry");
            match admin.retry(&selector).await? {
                None => println!("Message(s) not found"),
                Some(summary) => println!(
                    "\nRetry complete: {} succeeded, {} failed/retried",
                    summary.succeeded, summary.failed
                ),
            }
        }
        Command::Remove(target) => {
            let selector = target.selector("remove");
            match admin.remove(&selector).await? {
                None => println!("No messages found"),
                Some(count) => println!("\nRemoved {count} message(s) from DLQ"),
            }
        }
    }

    Ok(())
}

fn print_table(rows: &[DlqListing]) {
    if rows.is_empty() {
        println!("DLQ is empty - no failed notifications");
        return;
    }

    let rule = "=".repeat(100);
    println!("\n{rule}");
    println!(
        "{:<20} | {:<25} | {:<18} | {:<15} | {:<8}",
        "ID", "Email", "Type", "Entity", "Retries"
    );
    println!("{rule}");

    for row in rows {
        println!(
            "{:<20} | {:<25} | {:<18} | {:<15} | {:<8}",
            row.id, row.user_email, row.notification_type, row.entity_name, row.dlq_retries
        );
    }

    println!("{rule}");
    println!("Total: {} failed notification(s)\n", rows.len());
}
