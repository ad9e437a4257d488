//! Consumer-facing operations.
//!
//! Every call returns an [`ApiResponse`]: either `{ "data": ... }` or
//! `{ "error": { "kind", "message" } }`. Failures are classified, never
//! raw, so a host can render any result without special-casing.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{FailureKind, Result, ScanError, StoreError};
use crate::scanner::{ensure_supported, JobScanner};
use crate::types::{
    Job, JobPage, JobQuery, JobStatus, Link, LinkScanResult, LinkUpdate, NewLink, ScanSettings,
    SiteId,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&ScanError> for ApiError {
    fn from(error: &ScanError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Result envelope handed across the host boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiResponse<T> {
    Data { data: T },
    Error { error: ApiError },
}

impl<T> ApiResponse<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, ApiResponse::Data { .. })
    }

    pub fn data(self) -> Option<T> {
        match self {
            ApiResponse::Data { data } => Some(data),
            ApiResponse::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ApiError> {
        match self {
            ApiResponse::Data { .. } => None,
            ApiResponse::Error { error } => Some(error),
        }
    }
}

impl<T> From<Result<T>> for ApiResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => ApiResponse::Data { data },
            Err(e) => {
                warn!(kind = ?e.kind(), error = %e, "Scanner operation failed");
                ApiResponse::Error { error: ApiError::from(&e) }
            }
        }
    }
}

/// Links, jobs, scans and settings behind result envelopes.
#[derive(Clone)]
pub struct ScannerApi {
    scanner: Arc<JobScanner>,
}

impl ScannerApi {
    pub fn new(scanner: Arc<JobScanner>) -> Self {
        Self { scanner }
    }

    pub fn scanner(&self) -> &Arc<JobScanner> {
        &self.scanner
    }

    // Links

    /// Store a new link and start its first scan in the background.
    ///
    /// Links for boards without an adapter are rejected up front.
    pub async fn create_link(&self, new_link: NewLink) -> ApiResponse<Link> {
        self.create_link_inner(new_link).await.into()
    }

    async fn create_link_inner(&self, new_link: NewLink) -> Result<Link> {
        ensure_supported(self.scanner.registry(), &new_link.site)?;
        let link = self
            .scanner
            .store()
            .insert_link(new_link.into_link(Utc::now()))
            .await?;
        info!(link_id = %link.id, site = %link.site, url = %link.url, "Link created");

        // detached: failures land in the link's error count and the report stream
        self.scanner.spawn_initial_scan(link.clone());
        Ok(link)
    }

    pub async fn list_links(&self) -> ApiResponse<Vec<Link>> {
        self.scanner
            .store()
            .list_links()
            .await
            .map_err(ScanError::from)
            .into()
    }

    /// Edit a link. Disabled links are left out of scheduled runs but can
    /// still be scanned on demand.
    pub async fn update_link(&self, link_id: Uuid, update: LinkUpdate) -> ApiResponse<Link> {
        self.scanner
            .store()
            .update_link(link_id, &update)
            .await
            .map_err(ScanError::from)
            .into()
    }

    /// Delete a link; the jobs it found are kept.
    pub async fn delete_link(&self, link_id: Uuid) -> ApiResponse<()> {
        self.scanner
            .store()
            .delete_link(link_id)
            .await
            .map_err(ScanError::from)
            .into()
    }

    // Jobs

    pub async fn list_jobs(&self, query: JobQuery) -> ApiResponse<JobPage> {
        self.scanner
            .store()
            .list_jobs(&query)
            .await
            .map_err(ScanError::from)
            .into()
    }

    pub async fn get_job(&self, job_id: Uuid) -> ApiResponse<Job> {
        let result: Result<Job> = match self.scanner.store().get_job(job_id).await {
            Ok(Some(job)) => Ok(job),
            Ok(None) => Err(StoreError::JobNotFound { id: job_id }.into()),
            Err(e) => Err(e.into()),
        };
        result.into()
    }

    pub async fn update_job_status(&self, job_id: Uuid, status: JobStatus) -> ApiResponse<Job> {
        self.scanner
            .store()
            .update_job_status(job_id, status)
            .await
            .map_err(ScanError::from)
            .into()
    }

    /// Replace a job's labels. Scans never touch them.
    pub async fn update_job_labels(&self, job_id: Uuid, labels: Vec<String>) -> ApiResponse<Job> {
        self.scanner
            .store()
            .update_job_labels(job_id, labels)
            .await
            .map_err(ScanError::from)
            .into()
    }

    // Sites

    /// Sites links can be created for.
    pub fn list_sites(&self) -> ApiResponse<Vec<SiteId>> {
        ApiResponse::Data {
            data: self.scanner.registry().sites(),
        }
    }

    // Scans

    pub async fn scan_jobs(&self, jobs: Vec<Job>) -> ApiResponse<Vec<Job>> {
        self.scanner.scan_jobs(jobs).await.into()
    }

    pub async fn scan_link(&self, link_id: Uuid) -> ApiResponse<LinkScanResult> {
        self.scanner.scan_link(link_id).await.into()
    }

    pub fn is_scanning(&self) -> ApiResponse<bool> {
        ApiResponse::Data {
            data: self.scanner.is_scanning(),
        }
    }

    // Settings

    pub async fn update_settings(&self, settings: ScanSettings) -> ApiResponse<ScanSettings> {
        self.scanner.update_settings(settings).await.into()
    }

    pub fn get_settings(&self) -> ApiResponse<ScanSettings> {
        ApiResponse::Data {
            data: self.scanner.get_settings(),
        }
    }
}
