//! Seams between the engine and its collaborators.
//!
//! - [`PageFetcher`]: network access, returns rendered page content
//! - [`SiteAdapter`]: per-site listing and detail extraction
//! - [`ScanStore`]: links, jobs, settings and the atomic reconcile

pub mod adapter;
pub mod fetcher;
pub mod store;

pub use adapter::SiteAdapter;
pub use fetcher::{FetchOptions, PageContent, PageFetcher};
pub use store::{LinkScanCommit, MergeResult, ReconcileOutcome, ScanStore};
