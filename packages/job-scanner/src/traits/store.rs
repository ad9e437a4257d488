//! Storage collaborator for links, jobs and settings.
//!
//! Besides plain CRUD the store owns the two guarantees the engine relies on:
//! - `reconcile` is an atomic insert-if-absent-else-merge keyed by canonical
//!   URL, safe under concurrent callers
//! - a link's bookkeeping (error count, last-scanned timestamp) is written in
//!   the same transaction as the jobs found by that scan

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::{
    Job, JobCandidate, JobOrigin, JobPage, JobQuery, JobStatus, Link, LinkUpdate, ScanSettings,
    SiteId,
};

/// Result of reconciling a candidate batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub new_jobs: Vec<Job>,
    pub updated_jobs: Vec<Job>,
    /// Matched an existing job with identical content (no write)
    pub unchanged: usize,
    /// Dropped because their URL could not be canonicalized
    pub rejected: usize,
}

impl ReconcileOutcome {
    pub fn found(&self) -> usize {
        self.new_jobs.len() + self.updated_jobs.len() + self.unchanged
    }
}

/// Reconcile outcome plus the link's bookkeeping after the commit.
#[derive(Debug, Clone)]
pub struct LinkScanCommit {
    pub outcome: ReconcileOutcome,
    pub link: Link,
}

/// Result of merging detail-page fields into one job.
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub job: Job,
    pub changed: bool,
}

#[async_trait]
pub trait ScanStore: Send + Sync {
    // Links
    async fn list_links(&self) -> StoreResult<Vec<Link>>;
    async fn get_link(&self, id: Uuid) -> StoreResult<Option<Link>>;
    async fn insert_link(&self, link: Link) -> StoreResult<Link>;
    /// Edit title, URL or enabled flag; scan bookkeeping is kept.
    async fn update_link(&self, id: Uuid, update: &LinkUpdate) -> StoreResult<Link>;
    /// Jobs discovered through the link are kept and detached to
    /// [`JobOrigin::Manual`].
    async fn delete_link(&self, id: Uuid) -> StoreResult<()>;

    // Jobs
    async fn get_job(&self, id: Uuid) -> StoreResult<Option<Job>>;
    async fn list_jobs(&self, query: &JobQuery) -> StoreResult<JobPage>;
    async fn update_job_status(&self, id: Uuid, status: JobStatus) -> StoreResult<Job>;
    /// Replace a job's labels with `labels` after [`clean_labels`](crate::types::clean_labels).
    async fn update_job_labels(&self, id: Uuid, labels: Vec<String>) -> StoreResult<Job>;

    /// Insert new jobs and merge matches, keyed by canonical URL.
    async fn reconcile(
        &self,
        origin: JobOrigin,
        site: &SiteId,
        candidates: Vec<JobCandidate>,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<ReconcileOutcome>;

    /// Merge detail-page fields into an existing job (status and URL kept).
    async fn apply_job_details(
        &self,
        job_id: Uuid,
        details: JobCandidate,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<MergeResult>;

    // Scan bookkeeping

    /// Reconcile the link's candidates, reset its error count and stamp
    /// `last_scanned_at`, all in one transaction.
    async fn commit_link_scan(
        &self,
        link_id: Uuid,
        candidates: Vec<JobCandidate>,
        scanned_at: DateTime<Utc>,
    ) -> StoreResult<LinkScanCommit>;

    /// Increment the link's error count and store the last error.
    async fn record_link_failure(
        &self,
        link_id: Uuid,
        error: &str,
        failed_at: DateTime<Utc>,
    ) -> StoreResult<Link>;

    // Settings
    async fn load_settings(&self) -> StoreResult<Option<ScanSettings>>;
    async fn save_settings(&self, settings: &ScanSettings) -> StoreResult<()>;
}
