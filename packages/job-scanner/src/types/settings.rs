use serde::{Deserialize, Serialize};

/// Upper bound for `max_concurrency`.
pub const MAX_CONCURRENCY: usize = 64;

/// Cadence and concurrency for scheduled scans.
///
/// Persisted as `{ cronExpression, maxConcurrency, enabled }`. Only the
/// scheduler mutates the live copy, see
/// [`ScanScheduler::update_settings`](crate::scanner::ScanScheduler::update_settings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSettings {
    pub cron_expression: String,
    pub max_concurrency: usize,
    pub enabled: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            // Hourly, on the hour
            cron_expression: "0 0 * * * *".to_string(),
            max_concurrency: 2,
            enabled: true,
        }
    }
}

impl ScanSettings {
    pub fn new(cron_expression: impl Into<String>, max_concurrency: usize) -> Self {
        Self {
            cron_expression: cron_expression.into(),
            max_concurrency,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
