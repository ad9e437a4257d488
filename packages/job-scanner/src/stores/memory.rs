//! In-memory storage implementation for testing and development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{clamp_page_size, decode_page_token, encode_page_token};
use crate::dedup::{self, apply_merge, canonical_url, collapse_batch};
use crate::error::{StoreError, StoreResult};
use crate::traits::{LinkScanCommit, MergeResult, ReconcileOutcome, ScanStore};
use crate::types::{
    clean_labels, Job, JobCandidate, JobOrigin, JobPage, JobQuery, JobStatus, Link, LinkUpdate,
    ScanSettings, SiteId,
};

#[derive(Default)]
struct MemoryState {
    links: IndexMap<Uuid, Link>,
    jobs: HashMap<Uuid, Job>,
    /// canonical URL -> job id, the uniqueness constraint
    by_url: HashMap<String, Uuid>,
    settings: Option<ScanSettings>,
    /// Inserts plus content updates; `last_seen_at` touches are not writes
    job_writes: u64,
}

impl MemoryState {
    fn reconcile(
        &mut self,
        origin: JobOrigin,
        site: &SiteId,
        candidates: Vec<JobCandidate>,
        seen_at: DateTime<Utc>,
    ) -> ReconcileOutcome {
        let batch = collapse_batch(candidates);
        let mut outcome = ReconcileOutcome {
            rejected: batch.rejected,
            ..Default::default()
        };

        for (key, candidate) in batch.entries {
            match self.by_url.get(&key).and_then(|id| self.jobs.get_mut(id)) {
                Some(existing) => {
                    if apply_merge(existing, &candidate, seen_at) {
                        self.job_writes += 1;
                        outcome.updated_jobs.push(existing.clone());
                    } else {
                        outcome.unchanged += 1;
                    }
                }
                None => {
                    let job = dedup::new_job(origin, site, key.clone(), candidate, seen_at);
                    self.by_url.insert(key, job.id);
                    self.jobs.insert(job.id, job.clone());
                    self.job_writes += 1;
                    outcome.new_jobs.push(job);
                }
            }
        }

        outcome
    }

    fn link_mut(&mut self, id: Uuid) -> StoreResult<&mut Link> {
        self.links
            .get_mut(&id)
            .ok_or(StoreError::LinkNotFound { id })
    }
}

/// In-memory store for links, jobs and settings.
///
/// Every operation runs under one lock, which is what makes `reconcile`
/// an atomic insert-if-absent. Data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of job inserts and content updates so far.
    pub async fn job_writes(&self) -> u64 {
        self.state.read().await.job_writes
    }

    pub async fn job_count(&self) -> usize {
        self.state.read().await.jobs.len()
    }

    /// All stored jobs, oldest first.
    pub async fn jobs(&self) -> Vec<Job> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| (a.first_seen_at, a.id).cmp(&(b.first_seen_at, b.id)));
        jobs
    }

    /// Look up a job by any URL that canonicalizes to its key.
    pub async fn find_job_by_url(&self, url: &str) -> Option<Job> {
        let key = canonical_url(url).ok()?;
        let state = self.state.read().await;
        state.by_url.get(&key).and_then(|id| state.jobs.get(id)).cloned()
    }
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn list_links(&self) -> StoreResult<Vec<Link>> {
        Ok(self.state.read().await.links.values().cloned().collect())
    }

    async fn get_link(&self, id: Uuid) -> StoreResult<Option<Link>> {
        Ok(self.state.read().await.links.get(&id).cloned())
    }

    async fn insert_link(&self, link: Link) -> StoreResult<Link> {
        self.state
            .write()
            .await
            .links
            .insert(link.id, link.clone());
        Ok(link)
    }

    async fn update_link(&self, id: Uuid, update: &LinkUpdate) -> StoreResult<Link> {
        let mut state = self.state.write().await;
        let link = state.link_mut(id)?;
        update.apply(link);
        Ok(link.clone())
    }

    async fn delete_link(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.links.shift_remove(&id).is_none() {
            return Err(StoreError::LinkNotFound { id });
        }
        for job in state.jobs.values_mut() {
            if job.origin == JobOrigin::Link(id) {
                job.origin = JobOrigin::Manual;
            }
        }
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, query: &JobQuery) -> StoreResult<JobPage> {
        let cursor = query.after.as_deref().map(decode_page_token).transpose()?;
        let limit = clamp_page_size(query.limit);

        let state = self.state.read().await;
        let mut jobs: Vec<&Job> = state
            .jobs
            .values()
            .filter(|job| query.status.map_or(true, |status| job.status == status))
            .filter(|job| cursor.map_or(true, |c| (job.first_seen_at, job.id) < c))
            .collect();
        // newest first
        jobs.sort_by(|a, b| (b.first_seen_at, b.id).cmp(&(a.first_seen_at, a.id)));

        let has_more = jobs.len() > limit;
        let jobs: Vec<Job> = jobs.into_iter().take(limit).cloned().collect();
        let next_page_token = match jobs.last() {
            Some(last) if has_more => Some(encode_page_token(last.first_seen_at, last.id)),
            _ => None,
        };

        Ok(JobPage {
            jobs,
            next_page_token,
        })
    }

    async fn update_job_status(&self, id: Uuid, status: JobStatus) -> StoreResult<Job> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound { id })?;
        job.status = status;
        Ok(job.clone())
    }

    async fn update_job_labels(&self, id: Uuid, labels: Vec<String>) -> StoreResult<Job> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound { id })?;
        job.labels = clean_labels(labels);
        Ok(job.clone())
    }

    async fn reconcile(
        &self,
        origin: JobOrigin,
        site: &SiteId,
        candidates: Vec<JobCandidate>,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<ReconcileOutcome> {
        Ok(self
            .state
            .write()
            .await
            .reconcile(origin, site, candidates, seen_at))
    }

    async fn apply_job_details(
        &self,
        job_id: Uuid,
        details: JobCandidate,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<MergeResult> {
        let details = dedup::normalize_candidate(details);
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::JobNotFound { id: job_id })?;
        let changed = apply_merge(job, &details, seen_at);
        let job = job.clone();
        if changed {
            state.job_writes += 1;
        }
        Ok(MergeResult { job, changed })
    }

    async fn commit_link_scan(
        &self,
        link_id: Uuid,
        candidates: Vec<JobCandidate>,
        scanned_at: DateTime<Utc>,
    ) -> StoreResult<LinkScanCommit> {
        let mut state = self.state.write().await;
        let site = state.link_mut(link_id)?.site.clone();

        let outcome = state.reconcile(JobOrigin::Link(link_id), &site, candidates, scanned_at);

        let link = state.link_mut(link_id)?;
        link.scan_error_count = 0;
        link.last_error = None;
        link.last_scanned_at = Some(scanned_at);

        Ok(LinkScanCommit {
            outcome,
            link: link.clone(),
        })
    }

    async fn record_link_failure(
        &self,
        link_id: Uuid,
        error: &str,
        failed_at: DateTime<Utc>,
    ) -> StoreResult<Link> {
        let mut state = self.state.write().await;
        let link = state.link_mut(link_id)?;
        link.scan_error_count = link.scan_error_count.saturating_add(1);
        link.last_error = Some(error.to_string());
        link.last_scanned_at = Some(failed_at);
        Ok(link.clone())
    }

    async fn load_settings(&self) -> StoreResult<Option<ScanSettings>> {
        Ok(self.state.read().await.settings.clone())
    }

    async fn save_settings(&self, settings: &ScanSettings) -> StoreResult<()> {
        self.state.write().await.settings = Some(settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewLink;

    fn link() -> Link {
        NewLink {
            site: SiteId::from("test"),
            title: "Rust jobs".into(),
            url: "https://jobs.example.com/search?q=rust".parse().unwrap(),
        }
        .into_link(Utc::now())
    }

    #[tokio::test]
    async fn commit_resets_error_count() {
        let store = MemoryStore::new();
        let link = store.insert_link(link()).await.unwrap();

        store
            .record_link_failure(link.id, "boom", Utc::now())
            .await
            .unwrap();
        let failed = store.get_link(link.id).await.unwrap().unwrap();
        assert_eq!(failed.scan_error_count, 1);
        assert_eq!(failed.last_error.as_deref(), Some("boom"));

        let commit = store
            .commit_link_scan(
                link.id,
                vec![JobCandidate::new("https://jobs.example.com/1").with_title("Rust dev")],
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(commit.outcome.new_jobs.len(), 1);
        assert_eq!(commit.link.scan_error_count, 0);
        assert!(commit.link.last_error.is_none());
        assert!(commit.link.last_scanned_at.is_some());
        assert_eq!(commit.outcome.new_jobs[0].origin, JobOrigin::Link(link.id));
    }

    #[tokio::test]
    async fn commit_for_missing_link_fails() {
        let store = MemoryStore::new();
        let err = store
            .commit_link_scan(Uuid::new_v4(), vec![], Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LinkNotFound { .. }));
    }

    #[tokio::test]
    async fn delete_link_detaches_jobs() {
        let store = MemoryStore::new();
        let link = store.insert_link(link()).await.unwrap();
        store
            .commit_link_scan(
                link.id,
                vec![JobCandidate::new("https://jobs.example.com/1").with_title("Rust dev")],
                Utc::now(),
            )
            .await
            .unwrap();

        store.delete_link(link.id).await.unwrap();

        let jobs = store.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].origin, JobOrigin::Manual);
    }

    #[tokio::test]
    async fn update_link_keeps_bookkeeping() {
        let store = MemoryStore::new();
        let link = store.insert_link(link()).await.unwrap();
        store
            .record_link_failure(link.id, "boom", Utc::now())
            .await
            .unwrap();

        let url: url::Url = "https://jobs.example.com/search?q=go".parse().unwrap();
        let updated = store
            .update_link(
                link.id,
                &LinkUpdate::default()
                    .with_title("Go jobs")
                    .with_url(url.clone())
                    .with_enabled(false),
            )
            .await
            .unwrap();

        assert_eq!(updated.title, "Go jobs");
        assert_eq!(updated.url, url);
        assert!(!updated.enabled);
        assert_eq!(updated.scan_error_count, 1);
        assert_eq!(updated.last_error.as_deref(), Some("boom"));

        let err = store
            .update_link(Uuid::new_v4(), &LinkUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LinkNotFound { .. }));
    }

    #[tokio::test]
    async fn update_job_labels_cleans_input() {
        let store = MemoryStore::new();
        let outcome = store
            .reconcile(
                JobOrigin::Manual,
                &SiteId::from("test"),
                vec![JobCandidate::new("https://jobs.example.com/1").with_title("A")],
                Utc::now(),
            )
            .await
            .unwrap();
        let id = outcome.new_jobs[0].id;

        let job = store
            .update_job_labels(id, vec![" remote ".into(), "remote".into(), "".into()])
            .await
            .unwrap();
        assert_eq!(job.labels, ["remote"]);
        assert!(matches!(
            store.update_job_labels(Uuid::new_v4(), vec![]).await,
            Err(StoreError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_jobs_paginates_newest_first() {
        let store = MemoryStore::new();
        let site = SiteId::from("test");
        let start = Utc::now();
        for i in 0..5 {
            store
                .reconcile(
                    JobOrigin::Manual,
                    &site,
                    vec![JobCandidate::new(format!("https://jobs.example.com/{i}")).with_title("Job")],
                    start + chrono::Duration::seconds(i),
                )
                .await
                .unwrap();
        }

        let first = store
            .list_jobs(&JobQuery {
                limit: 3,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first.jobs.len(), 3);
        assert_eq!(first.jobs[0].external_url, "https://jobs.example.com/4");

        let second = store
            .list_jobs(&JobQuery {
                limit: 3,
                after: first.next_page_token.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second.jobs.len(), 2);
        assert_eq!(second.jobs[1].external_url, "https://jobs.example.com/0");
        assert!(second.next_page_token.is_none());
    }

    #[tokio::test]
    async fn list_jobs_filters_by_status() {
        let store = MemoryStore::new();
        let outcome = store
            .reconcile(
                JobOrigin::Manual,
                &SiteId::from("test"),
                vec![
                    JobCandidate::new("https://jobs.example.com/1").with_title("A"),
                    JobCandidate::new("https://jobs.example.com/2").with_title("B"),
                ],
                Utc::now(),
            )
            .await
            .unwrap();
        store
            .update_job_status(outcome.new_jobs[0].id, JobStatus::Applied)
            .await
            .unwrap();

        let applied = store
            .list_jobs(&JobQuery {
                status: Some(JobStatus::Applied),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(applied.jobs.len(), 1);
        assert_eq!(applied.jobs[0].id, outcome.new_jobs[0].id);
    }
}
