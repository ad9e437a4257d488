//! Typed errors for the scanning engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match on
//! the failure class. Every scan error maps onto a serialisable
//! [`FailureKind`], which is all the UI layer ever sees.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::SiteId;

/// Errors surfaced by scanner operations.
#[derive(Debug, Error)]
pub enum ScanError {
    /// No adapter is registered for the link's site
    #[error("no site adapter registered for site: {site}")]
    UnknownSite { site: SiteId },

    /// Page structure was not recognised by the adapter
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Page could not be fetched
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Settings were rejected; the previous settings stay in effect
    #[error("invalid scan settings: {reason}")]
    InvalidSettings { reason: String },

    /// Another scan run holds the running flag
    #[error("a scan is already in progress")]
    ScanInProgress,

    /// Persistent storage failed
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// A worker panicked or its task was aborted
    #[error("scan worker crashed: {reason}")]
    WorkerCrashed { reason: String },

    /// An adapter was configured with a selector that does not parse
    #[error("invalid adapter config for {site}: {reason}")]
    AdapterConfig { site: SiteId, reason: String },

    /// The cron scheduler refused an operation
    #[error("scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),

    /// The scanner is shutting down and no longer accepts runs
    #[error("scanner is shutting down")]
    ShuttingDown,
}

impl ScanError {
    /// Transient failures that the retry policy may re-attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::Fetch(_))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ScanError::UnknownSite { .. } => FailureKind::UnknownSite,
            ScanError::Parse(_) => FailureKind::Parse,
            ScanError::Fetch(FetchError::Timeout { .. }) => FailureKind::FetchTimeout,
            ScanError::Fetch(FetchError::Blocked { .. }) => FailureKind::FetchBlocked,
            ScanError::Fetch(FetchError::Network { .. }) => FailureKind::Network,
            ScanError::InvalidSettings { .. } => FailureKind::InvalidSettings,
            ScanError::ScanInProgress => FailureKind::ScanInProgress,
            ScanError::Storage(StoreError::LinkNotFound { .. } | StoreError::JobNotFound { .. }) => {
                FailureKind::NotFound
            }
            ScanError::Storage(StoreError::InvalidPageToken) => FailureKind::InvalidRequest,
            ScanError::Storage(_) => FailureKind::Storage,
            ScanError::WorkerCrashed { .. } => FailureKind::Crashed,
            ScanError::AdapterConfig { .. } => FailureKind::UnknownSite,
            ScanError::Scheduler(_) => FailureKind::Internal,
            ScanError::ShuttingDown => FailureKind::Cancelled,
        }
    }
}

/// Failures reported by a [`PageFetcher`](crate::traits::PageFetcher).
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The fetch (or fetch + extract) exceeded its deadline
    #[error("timed out after {timeout:?} fetching {url}")]
    Timeout { url: String, timeout: Duration },

    /// The site refused the request (403/429) or served a bot challenge
    #[error("blocked fetching {url}: {reason}")]
    Blocked {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    /// Connection, DNS, TLS or unexpected HTTP failure
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },
}

/// The adapter could not interpret the page structure.
#[derive(Debug, Clone, Error)]
#[error("failed to parse {site} page {url}: {reason}")]
pub struct ParseError {
    pub site: SiteId,
    pub url: String,
    pub reason: String,
}

impl ParseError {
    pub fn new(site: &SiteId, url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            site: site.clone(),
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from the storage collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("link not found: {id}")]
    LinkNotFound { id: Uuid },

    #[error("job not found: {id}")]
    JobNotFound { id: Uuid },

    #[error("invalid page token")]
    InvalidPageToken,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Stored data could not be mapped back into domain types
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Configuration could not be loaded or a client could not be built from it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be set")]
    Missing { key: &'static str },

    #[error("{key} must be a valid value, got {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, value: impl Into<String>, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            key,
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

/// Classified outcome of a failure, safe to hand to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownSite,
    Parse,
    FetchTimeout,
    FetchBlocked,
    Network,
    InvalidSettings,
    ScanInProgress,
    NotFound,
    InvalidRequest,
    Storage,
    Crashed,
    Cancelled,
    Internal,
}

/// Result type alias for scanner operations.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Result type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fetch_failures_are_retryable() {
        let timeout = ScanError::from(FetchError::Timeout {
            url: "https://example.com".into(),
            timeout: Duration::from_secs(1),
        });
        assert!(timeout.is_retryable());
        assert_eq!(timeout.kind(), FailureKind::FetchTimeout);

        let parse = ScanError::from(ParseError::new(
            &SiteId::from("linkedin"),
            "https://example.com",
            "no cards",
        ));
        assert!(!parse.is_retryable());
        assert_eq!(parse.kind(), FailureKind::Parse);

        assert!(!ScanError::ScanInProgress.is_retryable());
    }

    #[test]
    fn missing_records_are_not_found() {
        let err = ScanError::from(StoreError::LinkNotFound { id: Uuid::nil() });
        assert_eq!(err.kind(), FailureKind::NotFound);
        assert_eq!(
            ScanError::from(StoreError::Corrupt("bad status".into())).kind(),
            FailureKind::Storage
        );
    }

    #[test]
    fn blocked_carries_status() {
        let err = FetchError::Blocked {
            url: "https://example.com/jobs".into(),
            status: Some(429),
            reason: "HTTP 429".into(),
        };
        assert_eq!(ScanError::from(err.clone()).kind(), FailureKind::FetchBlocked);
        assert!(err.to_string().contains("HTTP 429"));
    }
}
