use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use uuid::Uuid;

use crate::error::{ConfigError, ConfigResult};
use crate::types::ScanSettings;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Retry behaviour for transient link and job failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Parse errors usually mean a layout change, so they fail fast by default
    pub retry_parse_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            retry_parse_errors: false,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.clamp(1, 5);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Delay before the attempt following `failed_attempt` (1-based).
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Settings for [`HttpPageFetcher`](crate::fetchers::HttpPageFetcher).
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub user_agent: String,
    /// Client-wide ceiling; per-fetch timeouts come from `FetchOptions`
    pub request_timeout: Duration,
    pub max_redirects: usize,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(90),
            max_redirects: 5,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Deadline for fetch + extract of a single page
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
    /// Error count at which a link is flagged for the user's attention
    pub error_threshold: u32,
    /// Used only when no settings are persisted yet
    pub initial_settings: ScanSettings,
    pub http: HttpFetcherConfig,
    /// Buffer of the report broadcast channel
    pub report_channel_capacity: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            error_threshold: 3,
            initial_settings: ScanSettings::default(),
            http: HttpFetcherConfig::default(),
            report_channel_capacity: 64,
        }
    }
}

impl ScannerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let defaults = Self::default();
        let initial = defaults.initial_settings.clone();

        let retry = RetryPolicy::default()
            .with_max_attempts(parse_or(&lookup, "SCANNER_MAX_ATTEMPTS", 2)?)
            .with_base_delay(Duration::from_millis(parse_or(
                &lookup,
                "SCANNER_RETRY_DELAY_MS",
                2000,
            )?));

        let initial_settings = ScanSettings {
            cron_expression: lookup("SCANNER_CRON").unwrap_or(initial.cron_expression),
            max_concurrency: parse_or(&lookup, "SCANNER_MAX_CONCURRENCY", initial.max_concurrency)?,
            enabled: parse_or(&lookup, "SCANNER_ENABLED", initial.enabled)?,
        };

        let fetch_timeout_secs: u64 = parse_or(&lookup, "SCANNER_FETCH_TIMEOUT_SECS", 60)?;
        if fetch_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "SCANNER_FETCH_TIMEOUT_SECS",
                "0",
                "must be at least 1 second",
            ));
        }

        Ok(Self {
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            retry,
            error_threshold: parse_or(&lookup, "SCANNER_ERROR_THRESHOLD", 3)?,
            initial_settings,
            http: HttpFetcherConfig {
                user_agent: lookup("SCANNER_USER_AGENT").unwrap_or(defaults.http.user_agent),
                ..defaults.http
            },
            report_channel_capacity: defaults.report_channel_capacity,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_initial_settings(mut self, settings: ScanSettings) -> Self {
        self.initial_settings = settings;
        self
    }

    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold;
        self
    }
}

/// Daemon configuration: where to store data and whose links to scan.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub database_url: String,
    pub user_id: Uuid,
    pub scanner: ScannerConfig,
}

impl DaemonConfig {
    pub fn from_env() -> ConfigResult<Self> {
        let scanner = ScannerConfig::from_env()?;
        let database_url = require("DATABASE_URL")?;
        let raw_user_id = require("SCANNER_USER_ID")?;
        let user_id = raw_user_id
            .trim()
            .parse::<Uuid>()
            .map_err(|e| ConfigError::invalid("SCANNER_USER_ID", raw_user_id.as_str(), e))?;
        Ok(Self {
            database_url,
            user_id,
            scanner,
        })
    }
}

fn require(key: &'static str) -> ConfigResult<String> {
    env::var(key).map_err(|_| ConfigError::Missing { key })
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::invalid(key, raw.as_str(), e)),
        None => Ok(default),
    }
}
