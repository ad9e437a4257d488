//! Scan orchestration.
//!
//! [`JobScanner`] wires the engine (runs, worker pool, running flag) to the
//! cron scheduler (cadence, settings). Both share one [`ScanState`] and one
//! settings channel; nothing else can mutate either.

mod engine;
pub mod pipeline;
pub mod scheduler;
pub mod state;

pub use scheduler::{normalize_cron, validate_settings, ScanScheduler, TickOutcome};
pub use state::{ScanGuard, ScanState};

pub(crate) use engine::ensure_supported;

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::SiteRegistry;
use crate::config::ScannerConfig;
use crate::error::Result;
use crate::traits::{PageFetcher, ScanStore};
use crate::types::{Job, Link, LinkScanResult, ScanReport, ScanSettings, ScanTrigger};
use engine::ScanEngine;

/// The scanning engine: scheduled runs, manual scans and backfills.
pub struct JobScanner {
    engine: Arc<ScanEngine>,
    scheduler: ScanScheduler,
}

impl JobScanner {
    /// Build the scanner. Persisted settings win over
    /// `config.initial_settings`; the timer is not armed until [`start`].
    ///
    /// [`start`]: JobScanner::start
    pub async fn new(
        store: Arc<dyn ScanStore>,
        fetcher: Arc<dyn PageFetcher>,
        registry: Arc<SiteRegistry>,
        config: ScannerConfig,
    ) -> Result<Self> {
        let settings = initial_settings(store.as_ref(), &config).await?;
        info!(
            cron = %settings.cron_expression,
            max_concurrency = settings.max_concurrency,
            enabled = settings.enabled,
            sites = ?registry.sites(),
            "Job scanner initialized"
        );

        let (settings_tx, settings_rx) = watch::channel(settings);
        let state = Arc::new(ScanState::new());
        let engine = Arc::new(ScanEngine::new(
            Arc::clone(&store),
            fetcher,
            registry,
            state,
            settings_rx,
            config,
        ));
        let scheduler = ScanScheduler::new(Arc::clone(&engine), store, settings_tx).await?;

        Ok(Self { engine, scheduler })
    }

    /// Start the cron runtime and arm the timer.
    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await
    }

    /// Run a full scan of every enabled link now.
    pub async fn scan_all(&self) -> Result<ScanReport> {
        self.engine.scan_all(ScanTrigger::Scheduled).await
    }

    /// Fire one scheduler tick by hand (skips when a run is in progress).
    pub async fn tick(&self) -> Result<TickOutcome> {
        self.scheduler.tick().await
    }

    pub async fn scan_link(&self, link_id: Uuid) -> Result<LinkScanResult> {
        self.engine.scan_link(link_id).await
    }

    pub async fn scan_jobs(&self, jobs: Vec<Job>) -> Result<Vec<Job>> {
        self.engine.scan_jobs(jobs).await
    }

    pub fn is_scanning(&self) -> bool {
        self.engine.is_scanning()
    }

    pub async fn update_settings(&self, settings: ScanSettings) -> Result<ScanSettings> {
        self.scheduler.update_settings(settings).await
    }

    pub fn get_settings(&self) -> ScanSettings {
        self.scheduler.get_settings()
    }

    /// Reports for every finished run, whatever triggered it.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanReport> {
        self.engine.subscribe()
    }

    /// Detached detail backfill for jobs a new link produced.
    pub fn on_link_created(&self, link: Link, new_jobs: Vec<Job>) -> JoinHandle<()> {
        self.engine.on_link_created(link, new_jobs)
    }

    /// Detached first scan of a new link, followed by its backfill.
    pub fn spawn_initial_scan(&self, link: Link) -> JoinHandle<()> {
        self.engine.spawn_initial_scan(link)
    }

    pub fn store(&self) -> &Arc<dyn ScanStore> {
        self.engine.store()
    }

    pub fn registry(&self) -> &SiteRegistry {
        self.engine.registry()
    }

    /// Stop the timer, then wait for the in-flight run to reach a link
    /// boundary and release the running flag.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down job scanner");
        let stopped = self.scheduler.shutdown().await;
        self.engine.shutdown().await;
        stopped
    }
}

async fn initial_settings(store: &dyn ScanStore, config: &ScannerConfig) -> Result<ScanSettings> {
    match store.load_settings().await? {
        Some(stored) => match validate_settings(&stored) {
            Ok(()) => Ok(stored),
            Err(e) => {
                warn!(error = %e, "Stored scan settings are invalid, using defaults");
                validate_settings(&config.initial_settings)?;
                Ok(config.initial_settings.clone())
            }
        },
        None => {
            validate_settings(&config.initial_settings)?;
            Ok(config.initial_settings.clone())
        }
    }
}
