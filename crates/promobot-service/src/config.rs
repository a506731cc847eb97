//! Service configuration.

use std::time::Duration;

use promobot_telegram::BackoffPolicy;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection string.
    pub database_url: String,

    /// Telegram bot token.
    pub bot_token: String,

    /// Override for the Bot API base URL (used against local test servers).
    pub telegram_api_url: Option<String>,

    /// AI generation backend base URL.
    pub generator_url: String,

    /// API key for the generation backend, if it requires one.
    pub generator_api_key: Option<String>,

    /// Long-poll wait in seconds for `getUpdates`.
    pub poll_wait_seconds: u64,

    /// Base delay in milliseconds for poll-failure backoff.
    pub backoff_base_ms: u64,

    /// Cap in milliseconds on any single backoff delay.
    pub backoff_cap_ms: u64,

    /// Consecutive poll failures tolerated before the loop halts.
    pub max_poll_failures: u32,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/promobot".into()),
            bot_token: std::env::var("BOT_TOKEN").unwrap_or_default(),
            telegram_api_url: std::env::var("TELEGRAM_API_URL").ok(),
            generator_url: std::env::var("GENERATOR_URL")
                .unwrap_or_else(|_| "http://localhost:9090".into()),
            generator_api_key: std::env::var("GENERATOR_API_KEY").ok(),
            poll_wait_seconds: env_parse("POLL_WAIT_SECONDS", 30),
            backoff_base_ms: env_parse("BACKOFF_BASE_MS", 1_000),
            backoff_cap_ms: env_parse("BACKOFF_CAP_MS", 60_000),
            max_poll_failures: env_parse("MAX_POLL_FAILURES", 8),
            max_body_bytes: env_parse("MAX_BODY_BYTES", 1024 * 1024),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS", 30),
        }
    }

    /// Backoff policy for the ingestion loop.
    #[must_use]
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.backoff_base_ms),
            cap: Duration::from_millis(self.backoff_cap_ms),
            max_failures: self.max_poll_failures,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: "postgres://localhost/promobot".into(),
            bot_token: String::new(),
            telegram_api_url: None,
            generator_url: "http://localhost:9090".into(),
            generator_api_key: None,
            poll_wait_seconds: 30,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 60_000,
            max_poll_failures: 8,
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}
