//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use outbox::RetryPolicy;
use saga::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3003`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `DATABASE_URL`: Postgres event store; in-memory when unset
/// - `PAYMENT_CALL_TIMEOUT_MS`, `PAYMENT_FAILURE_RATIO`,
///   `PAYMENT_FAILURE_THRESHOLD`, `PAYMENT_RESET_TIMEOUT_MS`,
///   `PAYMENT_WINDOW_MS`: payment-status circuit breaker
/// - `OUTBOX_MAX_ATTEMPTS`, `OUTBOX_INITIAL_BACKOFF_MS`,
///   `OUTBOX_MAX_BACKOFF_MS`: outbox retry policy
///
/// Values that fail to parse fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub breaker: BreakerConfig,
    pub retry: RetryPolicy,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, default: Duration| {
            parse(key).map(Duration::from_millis).unwrap_or(default)
        };

        let breaker = BreakerConfig {
            call_timeout: millis("PAYMENT_CALL_TIMEOUT_MS", defaults.breaker.call_timeout),
            failure_ratio: lookup("PAYMENT_FAILURE_RATIO")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|r| (0.0..=1.0).contains(r))
                .unwrap_or(defaults.breaker.failure_ratio),
            failure_threshold: parse("PAYMENT_FAILURE_THRESHOLD")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.breaker.failure_threshold),
            rolling_window: millis("PAYMENT_WINDOW_MS", defaults.breaker.rolling_window),
            reset_timeout: millis("PAYMENT_RESET_TIMEOUT_MS", defaults.breaker.reset_timeout),
        };

        let retry = RetryPolicy::new(
            parse("OUTBOX_MAX_ATTEMPTS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.retry.max_attempts),
            millis("OUTBOX_INITIAL_BACKOFF_MS", defaults.retry.initial_backoff),
            millis("OUTBOX_MAX_BACKOFF_MS", defaults.retry.max_backoff),
        );

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|f| f.parse().ok())
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            breaker,
            retry,
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
            port: 3003,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            breaker: BreakerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}
