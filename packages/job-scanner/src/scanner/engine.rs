//! Scan orchestration: runs, worker pool, per-link and per-job pipelines.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use super::pipeline::{self, crashed, fetch_and_extract, with_retry};
use super::state::{ScanGuard, ScanState};
use crate::adapters::SiteRegistry;
use crate::config::ScannerConfig;
use crate::error::{ParseError, Result, ScanError, StoreError};
use crate::traits::{MergeResult, PageFetcher, ReconcileOutcome, ScanStore};
use crate::types::{
    Job, Link, LinkOutcome, LinkScanResult, LinkScanStatus, ScanReport, ScanSettings, ScanTrigger,
    SiteId, MAX_CONCURRENCY,
};

/// Result of one link's pipeline: the report entry plus what was stored.
struct LinkRun {
    outcome: LinkOutcome,
    result: Result<ReconcileOutcome>,
}

pub(crate) struct ScanEngine {
    store: Arc<dyn ScanStore>,
    fetcher: Arc<dyn PageFetcher>,
    registry: Arc<SiteRegistry>,
    state: Arc<ScanState>,
    settings: watch::Receiver<ScanSettings>,
    config: ScannerConfig,
    reports: broadcast::Sender<ScanReport>,
    cancel: CancellationToken,
}

impl ScanEngine {
    pub(crate) fn new(
        store: Arc<dyn ScanStore>,
        fetcher: Arc<dyn PageFetcher>,
        registry: Arc<SiteRegistry>,
        state: Arc<ScanState>,
        settings: watch::Receiver<ScanSettings>,
        config: ScannerConfig,
    ) -> Self {
        let (reports, _) = broadcast::channel(config.report_channel_capacity.max(1));
        Self {
            store,
            fetcher,
            registry,
            state,
            settings,
            config,
            reports,
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn ScanStore> {
        &self.store
    }

    pub(crate) fn registry(&self) -> &SiteRegistry {
        &self.registry
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.state.is_scanning()
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ScanReport> {
        self.reports.subscribe()
    }

    fn acquire(&self) -> Result<ScanGuard> {
        if self.cancel.is_cancelled() {
            return Err(ScanError::ShuttingDown);
        }
        self.state.try_acquire().ok_or(ScanError::ScanInProgress)
    }

    pub(crate) fn settings_enabled(&self) -> bool {
        self.settings.borrow().enabled
    }

    fn concurrency(&self) -> usize {
        self.settings.borrow().max_concurrency.clamp(1, MAX_CONCURRENCY)
    }

    fn publish(&self, report: &ScanReport) {
        info!(
            run_id = %report.run_id,
            trigger = ?report.trigger,
            links_attempted = report.links_attempted,
            links_failed = report.links_failed,
            jobs_found = report.jobs_found,
            jobs_new = report.jobs_new,
            jobs_updated = report.jobs_updated,
            jobs_failed = report.jobs_failed,
            flagged = report.flagged_links.len(),
            "Scan run finished"
        );
        // no subscribers is fine
        let _ = self.reports.send(report.clone());
    }

    // ========================================================================
    // RUNS
    // ========================================================================

    /// Scan every enabled link with at most `max_concurrency` in flight.
    pub(crate) async fn scan_all(self: &Arc<Self>, trigger: ScanTrigger) -> Result<ScanReport> {
        let guard = self.acquire()?;
        let engine = Arc::clone(self);
        await_run(tokio::spawn(async move { engine.run_all(guard, trigger).await })).await
    }

    /// Scan one link, even if disabled, under its own run.
    pub(crate) async fn scan_link(self: &Arc<Self>, link_id: Uuid) -> Result<LinkScanResult> {
        let guard = self.acquire()?;
        let engine = Arc::clone(self);
        await_run(tokio::spawn(async move { engine.run_link(guard, link_id).await })).await
    }

    /// Re-fetch detail pages for `jobs` and merge what they add.
    ///
    /// The result has one entry per input, in input order; a job whose
    /// detail scan failed comes back unchanged and is counted in the report.
    pub(crate) async fn scan_jobs(self: &Arc<Self>, jobs: Vec<Job>) -> Result<Vec<Job>> {
        let guard = self.acquire()?;
        let engine = Arc::clone(self);
        await_run(tokio::spawn(async move { engine.run_jobs(guard, jobs).await })).await
    }

    async fn run_all(self: &Arc<Self>, guard: ScanGuard, trigger: ScanTrigger) -> Result<ScanReport> {
        let mut report = ScanReport::new(trigger);

        let links: Vec<Link> = self
            .store
            .list_links()
            .await?
            .into_iter()
            .filter(|link| link.enabled)
            .collect();

        if links.is_empty() {
            drop(guard);
            info!(run_id = %report.run_id, "No enabled links to scan");
            let report = report.finish();
            self.publish(&report);
            return Ok(report);
        }

        let concurrency = self.concurrency();
        info!(
            run_id = %report.run_id,
            links = links.len(),
            concurrency,
            "Starting scan run"
        );
        self.scan_links(links, concurrency, &mut report).await;

        drop(guard);
        let report = report.finish();
        self.publish(&report);
        Ok(report)
    }

    async fn run_link(self: &Arc<Self>, guard: ScanGuard, link_id: Uuid) -> Result<LinkScanResult> {
        let link = self
            .store
            .get_link(link_id)
            .await?
            .ok_or(StoreError::LinkNotFound { id: link_id })?;

        let mut report = ScanReport::new(ScanTrigger::ManualLink);
        let run = self.join_link(&link, self.spawn_link(link.clone(), None)).await;
        report.record_link(run.outcome, self.config.error_threshold);

        drop(guard);
        let report = report.finish();
        self.publish(&report);

        let outcome = run.result?;
        Ok(LinkScanResult {
            new_jobs_count: outcome.new_jobs.len(),
            updated_jobs_count: outcome.updated_jobs.len(),
            new_jobs: outcome.new_jobs,
        })
    }

    async fn run_jobs(self: &Arc<Self>, guard: ScanGuard, jobs: Vec<Job>) -> Result<Vec<Job>> {
        let mut report = ScanReport::new(ScanTrigger::JobBackfill);
        let jobs = self.scan_jobs_locked(jobs, &mut report).await;

        drop(guard);
        let report = report.finish();
        self.publish(&report);
        Ok(jobs)
    }

    /// Backfill the jobs a freshly created link produced, in the background.
    pub(crate) fn on_link_created(self: &Arc<Self>, link: Link, new_jobs: Vec<Job>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let guard = match engine.acquire() {
                Ok(guard) => guard,
                Err(e) => return engine.detached_failure(&link, e).await,
            };
            let mut report = ScanReport::new(ScanTrigger::JobBackfill);
            engine.backfill_for_link(&link, new_jobs, &mut report).await;

            drop(guard);
            engine.publish(&report.finish());
        })
    }

    /// Scan a freshly created link and backfill its new jobs, in the
    /// background, holding the running flag across both steps.
    pub(crate) fn spawn_initial_scan(self: &Arc<Self>, link: Link) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let guard = match engine.acquire() {
                Ok(guard) => guard,
                Err(e) => return engine.detached_failure(&link, e).await,
            };
            let mut report = ScanReport::new(ScanTrigger::ManualLink);
            let run = engine
                .join_link(&link, engine.spawn_link(link.clone(), None))
                .await;
            report.record_link(run.outcome, engine.config.error_threshold);

            if let Ok(outcome) = run.result {
                if !outcome.new_jobs.is_empty() {
                    engine
                        .backfill_for_link(&link, outcome.new_jobs, &mut report)
                        .await;
                }
            }

            drop(guard);
            engine.publish(&report.finish());
        })
    }

    /// Stop accepting runs and wait for the in-flight one to release the flag.
    ///
    /// Workers finish the link they are on; links not yet started are skipped.
    pub(crate) async fn shutdown(&self) {
        self.cancel.cancel();
        self.state.wait_idle().await;
    }

    // ========================================================================
    // LINK PIPELINE
    // ========================================================================

    async fn scan_links(self: &Arc<Self>, links: Vec<Link>, concurrency: usize, report: &mut ScanReport) {
        let permits = Arc::new(Semaphore::new(concurrency));
        let handles: Vec<(Link, JoinHandle<LinkRun>)> = links
            .into_iter()
            .map(|link| {
                let handle = self.spawn_link(link.clone(), Some(Arc::clone(&permits)));
                (link, handle)
            })
            .collect();

        for (link, handle) in handles {
            let run = self.join_link(&link, handle).await;
            report.record_link(run.outcome, self.config.error_threshold);
        }
    }

    fn spawn_link(self: &Arc<Self>, link: Link, permits: Option<Arc<Semaphore>>) -> JoinHandle<LinkRun> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = match permits {
                Some(permits) => match permits.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return engine.skipped(&link),
                },
                None => None,
            };
            // link boundary: the only place a shutdown stops work
            if engine.cancel.is_cancelled() {
                return engine.skipped(&link);
            }
            engine.scan_link_pipeline(&link).await
        })
    }

    /// Await a link task; a panic becomes a classified, recorded failure.
    async fn join_link(&self, link: &Link, handle: JoinHandle<LinkRun>) -> LinkRun {
        match handle.await {
            Ok(run) => run,
            Err(join_error) => {
                let error = crashed(join_error);
                error!(link_id = %link.id, site = %link.site, error = %error, "Link worker crashed");
                self.link_failed(link, error, 1).await
            }
        }
    }

    async fn scan_link_pipeline(&self, link: &Link) -> LinkRun {
        let adapter = match self.registry.resolve(&link.site) {
            Ok(adapter) => adapter,
            Err(e) => return self.link_failed(link, e, 0).await,
        };

        debug!(link_id = %link.id, site = %link.site, url = %link.url, "Scanning link");
        let (result, attempts) = with_retry(&self.config.retry, &self.cancel, &link.id.to_string(), || {
            fetch_and_extract(
                self.fetcher.as_ref(),
                Arc::clone(&adapter),
                &link.url,
                self.config.fetch_timeout,
                pipeline::listing,
            )
        })
        .await;

        let candidates = match result {
            Ok(candidates) => candidates,
            Err(e) => return self.link_failed(link, e, attempts).await,
        };

        match self.store.commit_link_scan(link.id, candidates, Utc::now()).await {
            Ok(commit) => {
                let outcome = commit.outcome;
                info!(
                    link_id = %link.id,
                    site = %link.site,
                    found = outcome.found(),
                    new = outcome.new_jobs.len(),
                    updated = outcome.updated_jobs.len(),
                    rejected = outcome.rejected,
                    "Link scanned"
                );
                LinkRun {
                    outcome: LinkOutcome {
                        link_id: link.id,
                        site: link.site.clone(),
                        attempts,
                        scan_error_count: commit.link.scan_error_count,
                        status: LinkScanStatus::Succeeded {
                            jobs_found: outcome.found(),
                            jobs_new: outcome.new_jobs.len(),
                            jobs_updated: outcome.updated_jobs.len(),
                            jobs_unchanged: outcome.unchanged,
                        },
                    },
                    result: Ok(outcome),
                }
            }
            Err(e) => self.link_failed(link, e.into(), attempts).await,
        }
    }

    /// Record a failed link scan: bump its error count and build the outcome.
    async fn link_failed(&self, link: &Link, error: ScanError, attempts: u32) -> LinkRun {
        warn!(
            link_id = %link.id,
            site = %link.site,
            kind = ?error.kind(),
            attempts,
            error = %error,
            "Link scan failed"
        );

        let scan_error_count = self.record_link_error(link, &error.to_string()).await;

        LinkRun {
            outcome: LinkOutcome {
                link_id: link.id,
                site: link.site.clone(),
                attempts,
                scan_error_count,
                status: LinkScanStatus::Failed {
                    kind: error.kind(),
                    message: error.to_string(),
                },
            },
            result: Err(error),
        }
    }

    /// Increment the link's error count; returns the count now stored.
    async fn record_link_error(&self, link: &Link, message: &str) -> u32 {
        match self
            .store
            .record_link_failure(link.id, message, Utc::now())
            .await
        {
            Ok(updated) => {
                if updated.needs_attention(self.config.error_threshold) {
                    warn!(
                        link_id = %link.id,
                        site = %link.site,
                        scan_error_count = updated.scan_error_count,
                        "Link keeps failing and needs attention"
                    );
                }
                updated.scan_error_count
            }
            Err(e) => {
                error!(link_id = %link.id, error = %e, "Failed to record link failure");
                link.scan_error_count
            }
        }
    }

    fn skipped(&self, link: &Link) -> LinkRun {
        debug!(link_id = %link.id, "Skipping link, scanner is shutting down");
        LinkRun {
            outcome: LinkOutcome {
                link_id: link.id,
                site: link.site.clone(),
                attempts: 0,
                scan_error_count: link.scan_error_count,
                status: LinkScanStatus::Skipped,
            },
            result: Err(ScanError::ShuttingDown),
        }
    }

    // ========================================================================
    // JOB PIPELINE
    // ========================================================================

    async fn scan_jobs_locked(self: &Arc<Self>, jobs: Vec<Job>, report: &mut ScanReport) -> Vec<Job> {
        if jobs.is_empty() {
            return jobs;
        }

        let permits = Arc::new(Semaphore::new(self.concurrency()));
        let handles: Vec<(Job, JoinHandle<Result<MergeResult>>)> = jobs
            .into_iter()
            .map(|job| {
                let engine = Arc::clone(self);
                let permits = Arc::clone(&permits);
                let task_job = job.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| ScanError::ShuttingDown)?;
                    if engine.cancel.is_cancelled() {
                        return Err(ScanError::ShuttingDown);
                    }
                    engine.scan_job_pipeline(&task_job).await
                });
                (job, handle)
            })
            .collect();

        let mut scanned = Vec::with_capacity(handles.len());
        for (job, handle) in handles {
            let result = handle.await.unwrap_or_else(|e| Err(crashed(e)));
            match result {
                Ok(merge) => {
                    report.jobs_found += 1;
                    if merge.changed {
                        report.jobs_updated += 1;
                    } else {
                        report.jobs_unchanged += 1;
                    }
                    scanned.push(merge.job);
                }
                Err(e) => {
                    warn!(job_id = %job.id, site = %job.site, kind = ?e.kind(), error = %e, "Job detail scan failed");
                    report.record_job_failure(job.id, &e);
                    scanned.push(job);
                }
            }
        }
        scanned
    }

    async fn scan_job_pipeline(&self, job: &Job) -> Result<MergeResult> {
        let adapter = self.registry.resolve(&job.site)?;
        let url = Url::parse(&job.external_url).map_err(|e| {
            ParseError::new(&job.site, job.external_url.as_str(), format!("invalid job url: {e}"))
        })?;

        let (result, _attempts) = with_retry(&self.config.retry, &self.cancel, &job.id.to_string(), || {
            fetch_and_extract(
                self.fetcher.as_ref(),
                Arc::clone(&adapter),
                &url,
                self.config.fetch_timeout,
                pipeline::detail,
            )
        })
        .await;

        let merge = self
            .store
            .apply_job_details(job.id, result?, Utc::now())
            .await?;
        debug!(job_id = %job.id, changed = merge.changed, "Job details merged");
        Ok(merge)
    }

    /// Backfill a link's new jobs; any failed job counts once against the link.
    async fn backfill_for_link(self: &Arc<Self>, link: &Link, jobs: Vec<Job>, report: &mut ScanReport) {
        let total = jobs.len();
        let failed_before = report.jobs_failed;
        self.scan_jobs_locked(jobs, report).await;

        let failed = report.jobs_failed - failed_before;
        if failed > 0 {
            let message = format!("{failed} of {total} job details failed to load");
            let count = self.record_link_error(link, &message).await;
            if link_needs_flag(count, self.config.error_threshold) && !report.flagged_links.contains(&link.id) {
                report.flagged_links.push(link.id);
            }
        }
    }

    /// A background scan could not run at all; keep the failure observable.
    async fn detached_failure(&self, link: &Link, error: ScanError) {
        warn!(
            link_id = %link.id,
            kind = ?error.kind(),
            error = %error,
            "Background scan for new link could not run"
        );
        let mut report = ScanReport::new(ScanTrigger::ManualLink);
        let run = self.link_failed(link, error, 0).await;
        report.record_link(run.outcome, self.config.error_threshold);
        self.publish(&report.finish());
    }
}

/// Await a run task that owns the running flag.
///
/// The run lives in its own task, so a caller that stops waiting does not
/// release the flag while link workers are still writing.
async fn await_run<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    handle.await.unwrap_or_else(|e| Err(crashed(e)))
}

fn link_needs_flag(count: u32, threshold: u32) -> bool {
    threshold > 0 && count >= threshold
}

/// Site ids are resolved before any network call; used by the facade to
/// reject links for unsupported boards at creation time.
pub(crate) fn ensure_supported(registry: &SiteRegistry, site: &SiteId) -> Result<()> {
    registry.resolve(site).map(|_| ())
}
