//! Application configuration loaded from environment variables.

use std::time::Duration;

use common::LogFormat;

use crate::retry::RetryConfig;

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` / `PORT`: HTTP bind address (default `0.0.0.0:3000`)
/// - `NATS_URL`: broker (default `nats://localhost:4222`)
/// - `DATABASE_URL`: PostgreSQL event store; unset means in-memory
/// - `CART_STREAM` / `CART_SUBJECT`: default `cart` / `cart.events`
/// - `OUTBOX_INTERVAL_MS`: relay sweep period (default `1000`)
/// - `MAX_CONFLICT_RETRIES`: attempts per command on a version conflict (default `3`)
/// - `LOG_FORMAT`: `text` or `json` (default `text`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub nats_url: String,
    pub database_url: Option<String>,
    pub stream: String,
    pub subject: String,
    pub outbox_interval: Duration,
    pub max_conflict_retries: u32,
    pub log_format: LogFormat,
    pub log_level: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            nats_url: lookup("NATS_URL").unwrap_or(defaults.nats_url),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            stream: lookup("CART_STREAM").unwrap_or(defaults.stream),
            subject: lookup("CART_SUBJECT").unwrap_or(defaults.subject),
            outbox_interval: parsed("OUTBOX_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_interval),
            max_conflict_retries: parsed("MAX_CONFLICT_RETRIES")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.max_conflict_retries),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Retry policy for commands that lose a version race.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_conflict_retries.max(1),
            ..RetryConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            nats_url: "nats://localhost:4222".to_string(),
            database_url: None,
            stream: messaging::DEFAULT_STREAM.to_string(),
            subject: messaging::DEFAULT_SUBJECT.to_string(),
            outbox_interval: Duration::from_millis(1000),
            max_conflict_retries: 3,
            log_format: LogFormat::Text,
            log_level: "info".to_string(),
        }
    }
}
