//! Billing service configuration loaded from environment variables.

use common::LogFormat;

/// Server and subscription configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` / `PORT`: HTTP bind address (default `0.0.0.0:3001`)
/// - `NATS_URL`: broker (default `nats://localhost:4222`)
/// - `CART_STREAM` / `CART_SUBJECT`: default `cart` / `cart.events`
/// - `CONSUMER_GROUP`: durable group shared by instances (default `billing-service`)
/// - `DEDUP_WINDOW`: message ids remembered for de-duplication (default `10000`)
/// - `LOG_FORMAT`: `text` or `json` (default `text`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub nats_url: String,
    pub stream: String,
    pub subject: String,
    pub consumer_group: String,
    pub dedup_window: usize,
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

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            nats_url: lookup("NATS_URL").unwrap_or(defaults.nats_url),
            stream: lookup("CART_STREAM").unwrap_or(defaults.stream),
            subject: lookup("CART_SUBJECT").unwrap_or(defaults.subject),
            consumer_group: lookup("CONSUMER_GROUP")
                .filter(|g| !g.trim().is_empty())
                .unwrap_or(defaults.consumer_group),
            dedup_window: lookup("DEDUP_WINDOW")
                .and_then(|w| w.parse().ok())
                .unwrap_or(defaults.dedup_window),
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
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            nats_url: "nats://localhost:4222".to_string(),
            stream: messaging::DEFAULT_STREAM.to_string(),
            subject: messaging::DEFAULT_SUBJECT.to_string(),
            consumer_group: messaging::DEFAULT_CONSUMER_GROUP.to_string(),
            dedup_window: messaging::dedup::DEFAULT_WINDOW,
            log_format: LogFormat::Text,
            log_level: "info".to_string(),
        }
    }
}
