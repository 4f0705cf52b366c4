//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::CallPolicy;

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON log lines, anything else for text
/// - `INVENTORY_URL`, `PAYMENT_URL`, `SHIPPING_URL`: downstream base URLs
/// - `DOWNSTREAM_TIMEOUT_MS`: per-attempt timeout (default: `5000`)
/// - `RETRY_MAX_ATTEMPTS`: forward step attempt ceiling (default: `3`)
/// - `COMPENSATION_MAX_ATTEMPTS`: inverse call attempt ceiling (default: `8`)
/// - `RETRY_MIN_DELAY_MS` / `RETRY_MAX_DELAY_MS`: backoff bounds (default: `200` / `2000`)
/// - `DEBUG_DISABLE_RETRIES`: `true` or `1` to attempt every call once
/// - `DATABASE_URL`: PostgreSQL stores when set, in-memory otherwise
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub inventory_url: String,
    pub payment_url: String,
    pub shipping_url: String,
    pub downstream_timeout: Duration,
    pub retry_max_attempts: usize,
    pub compensation_max_attempts: usize,
    pub retry_min_delay: Duration,
    pub retry_max_delay: Duration,
    pub disable_retries: bool,
    pub database_url: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// Unparseable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, default: Duration| {
            parsed(key).map(Duration::from_millis).unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or_default(),
            inventory_url: lookup("INVENTORY_URL").unwrap_or(defaults.inventory_url),
            payment_url: lookup("PAYMENT_URL").unwrap_or(defaults.payment_url),
            shipping_url: lookup("SHIPPING_URL").unwrap_or(defaults.shipping_url),
            downstream_timeout: millis("DOWNSTREAM_TIMEOUT_MS", defaults.downstream_timeout),
            retry_max_attempts: parsed("RETRY_MAX_ATTEMPTS")
                .map(|n| n.max(1) as usize)
                .unwrap_or(defaults.retry_max_attempts),
            compensation_max_attempts: parsed("COMPENSATION_MAX_ATTEMPTS")
                .map(|n| n.max(1) as usize)
                .unwrap_or(defaults.compensation_max_attempts),
            retry_min_delay: millis("RETRY_MIN_DELAY_MS", defaults.retry_min_delay),
            retry_max_delay: millis("RETRY_MAX_DELAY_MS", defaults.retry_max_delay),
            disable_retries: lookup("DEBUG_DISABLE_RETRIES")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.disable_retries),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Call policy for forward saga steps.
    pub fn forward_policy(&self) -> CallPolicy {
        self.apply(CallPolicy::forward().with_max_attempts(self.retry_max_attempts))
    }

    /// Call policy for compensating calls.
    pub fn compensation_policy(&self) -> CallPolicy {
        self.apply(CallPolicy::compensation().with_max_attempts(self.compensation_max_attempts))
    }

    fn apply(&self, policy: CallPolicy) -> CallPolicy {
        let policy = policy
            .with_delays(self.retry_min_delay, self.retry_max_delay)
            .with_timeout(self.downstream_timeout);
        if self.disable_retries {
            policy.without_retries()
        } else {
            policy
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            inventory_url: "http://localhost:8006".to_string(),
            payment_url: "http://localhost:8005".to_string(),
            shipping_url: "http://localhost:8007".to_string(),
            downstream_timeout: Duration::from_millis(5000),
            retry_max_attempts: 3,
            compensation_max_attempts: 8,
            retry_min_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_millis(2000),
            disable_retries: false,
            database_url: None,
        }
    }
}
