//! Environment-backed configuration, read once at binary startup

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL for `related_link` construction
    pub site_url: String,
    pub redis_url: String,
    pub database_url: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    /// Consumer identity within the worker group
    pub consumer_name: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let site_url = std::env::var("SITE_URL")
            .unwrap_or_else(|_| "https://nest.owasp.org".to_string());
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let smtp_host = std::env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string());
        let smtp_port = std::env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".to_string())
            .parse()
            .context("SMTP_PORT must be a valid u16")?;
        let smtp_username = std::env::var("SMTP_USERNAME").ok();
        let smtp_password = std::env::var("SMTP_PASSWORD").ok();

        let consumer_name =
            std::env::var("CONSUMER_NAME").unwrap_or_else(|_| default_consumer_name());

        Ok(Self {
            site_url,
            redis_url,
            database_url,
            smtp_host,
            smtp_port,
            smtp_username,
            smtp_password,
            consumer_name,
        })
    }

    /// SMTP credentials when both halves are configured
    pub fn smtp_credentials(&self) -> Option<(String, String)> {
        match (&self.smtp_username, &self.smtp_password) {
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
            _ => None,
        }
    }
}

/// `{host}_{pid}`: one consumer identity per worker process
fn default_consumer_name() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    format!("{}_{}", host, std::process::id())
}
