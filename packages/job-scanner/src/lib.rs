//! Job-board scanning engine.
//!
//! Periodically scans user-configured job-board searches ("links"),
//! extracts postings through per-site adapters, and reconciles them into a
//! deduplicated job store keyed by canonical URL.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use job_scanner::{HttpPageFetcher, JobScanner, MemoryStore, ScannerConfig, SiteRegistry};
//!
//! let config = ScannerConfig::from_env()?;
//! let scanner = JobScanner::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(HttpPageFetcher::new(&config.http)?),
//!     Arc::new(SiteRegistry::with_defaults()?),
//!     config,
//! )
//! .await?;
//! scanner.start().await?;
//! ```
//!
//! # Modules
//!
//! - [`scanner`] - Runs, scheduling, running flag and the [`JobScanner`] facade
//! - [`adapters`] - Site adapter registry and the CSS-selector adapter
//! - [`dedup`] - Canonical URLs and the merge rule
//! - [`stores`] - Storage implementations (MemoryStore, PostgresStore)
//! - [`fetchers`] - HTTP page fetcher
//! - [`api`] - Consumer-facing operations behind result envelopes
//! - [`testing`] - Mock fetcher, static adapter and HTML fixtures

pub mod adapters;
pub mod api;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fetchers;
pub mod scanner;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

pub use adapters::{SelectorAdapter, SelectorSpec, SiteRegistry};
pub use api::{ApiError, ApiResponse, ScannerApi};
pub use config::{DaemonConfig, HttpFetcherConfig, RetryPolicy, ScannerConfig};
pub use error::{ConfigError, FailureKind, FetchError, ParseError, Result, ScanError, StoreError};
pub use fetchers::HttpPageFetcher;
pub use scanner::{JobScanner, ScanScheduler, TickOutcome};
pub use stores::{MemoryStore, PostgresStore};
pub use traits::{FetchOptions, PageContent, PageFetcher, ScanStore, SiteAdapter};
pub use types::{
    Job, JobCandidate, JobOrigin, JobPage, JobQuery, JobStatus, Link, LinkOutcome, LinkScanResult,
    LinkScanStatus, LinkUpdate, NewLink, ScanFailure, ScanReport, ScanSettings, ScanTarget, ScanTrigger, SiteId,
    MAX_CONCURRENCY,
};
