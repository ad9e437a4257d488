//! Cron-driven trigger for scheduled scan runs.
//!
//! The scheduler is the single writer of [`ScanSettings`]: updates are
//! validated, persisted, published on a `watch` channel the engine reads
//! from, and the cron job is re-armed so the new cadence counts from the
//! moment of the update.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::engine::ScanEngine;
use crate::error::{Result, ScanError};
use crate::traits::ScanStore;
use crate::types::{ScanReport, ScanSettings, ScanTrigger, MAX_CONCURRENCY};

/// What a timer tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Completed(ScanReport),
    /// A run was already in progress; the tick is dropped, not queued
    SkippedScanning,
    SkippedDisabled,
    SkippedShuttingDown,
}

struct CronState {
    scheduler: JobScheduler,
    job: Option<Uuid>,
    started: bool,
    stopped: bool,
}

pub struct ScanScheduler {
    engine: Arc<ScanEngine>,
    store: Arc<dyn ScanStore>,
    settings: watch::Sender<ScanSettings>,
    cron: Mutex<CronState>,
}

/// Accept 5-field (minute resolution) expressions by pinning seconds to 0.
pub fn normalize_cron(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        fields.join(" ")
    }
}

/// Check settings without applying them.
pub fn validate_settings(settings: &ScanSettings) -> Result<()> {
    if settings.max_concurrency < 1 {
        return Err(ScanError::InvalidSettings {
            reason: "maxConcurrency must be at least 1".to_string(),
        });
    }
    if settings.max_concurrency > MAX_CONCURRENCY {
        return Err(ScanError::InvalidSettings {
            reason: format!("maxConcurrency must be at most {MAX_CONCURRENCY}"),
        });
    }

    let expression = normalize_cron(&settings.cron_expression);
    if expression.is_empty() {
        return Err(ScanError::InvalidSettings {
            reason: "cronExpression must not be empty".to_string(),
        });
    }
    Job::new_async(expression.as_str(), |_uuid, _lock| Box::pin(async {})).map_err(|e| {
        ScanError::InvalidSettings {
            reason: format!("unsupported cronExpression {:?}: {e}", settings.cron_expression),
        }
    })?;
    Ok(())
}

impl ScanScheduler {
    pub(crate) async fn new(
        engine: Arc<ScanEngine>,
        store: Arc<dyn ScanStore>,
        settings: watch::Sender<ScanSettings>,
    ) -> Result<Self> {
        Ok(Self {
            engine,
            store,
            settings,
            cron: Mutex::new(CronState {
                scheduler: JobScheduler::new().await?,
                job: None,
                started: false,
                stopped: false,
            }),
        })
    }

    /// Start the cron runtime and arm the timer for the current settings.
    pub async fn start(&self) -> Result<()> {
        let mut cron = self.cron.lock().await;
        if cron.stopped {
            return Err(ScanError::ShuttingDown);
        }
        if cron.started {
            return Ok(());
        }
        cron.scheduler.start().await?;
        cron.started = true;

        let settings = self.get_settings();
        self.arm(&mut cron, &settings).await
    }

    pub fn get_settings(&self) -> ScanSettings {
        self.settings.borrow().clone()
    }

    /// Validate, persist and apply new settings.
    ///
    /// Rejected settings leave the previous ones in effect. Repeating the
    /// current settings is a no-op and does not reset the timer.
    pub async fn update_settings(&self, new: ScanSettings) -> Result<ScanSettings> {
        let new = ScanSettings {
            cron_expression: new.cron_expression.trim().to_string(),
            ..new
        };
        if let Err(e) = validate_settings(&new) {
            warn!(error = %e, "Rejected scan settings update");
            return Err(e);
        }

        let mut cron = self.cron.lock().await;
        if *self.settings.borrow() == new {
            return Ok(new);
        }

        self.store.save_settings(&new).await?;
        self.settings.send_replace(new.clone());
        info!(
            cron = %new.cron_expression,
            max_concurrency = new.max_concurrency,
            enabled = new.enabled,
            "Scan settings updated"
        );

        if cron.started && !cron.stopped {
            self.arm(&mut cron, &new).await?;
        }
        Ok(new)
    }

    /// Replace the armed cron job (if any) with one for `settings`.
    async fn arm(&self, cron: &mut CronState, settings: &ScanSettings) -> Result<()> {
        if let Some(previous) = cron.job.take() {
            cron.scheduler.remove(&previous).await?;
        }
        if !settings.enabled {
            info!("Scheduled scans disabled");
            return Ok(());
        }

        let expression = normalize_cron(&settings.cron_expression);
        let engine = Arc::clone(&self.engine);
        let job = Job::new_async(expression.as_str(), move |_uuid, _lock| {
            let engine = Arc::clone(&engine);
            Box::pin(async move {
                if let Err(e) = tick(&engine).await {
                    error!(error = %e, "Scheduled scan run failed");
                }
            })
        })?;

        cron.job = Some(cron.scheduler.add(job).await?);
        info!(cron = %expression, "Scheduled scans armed");
        Ok(())
    }

    /// Run one timer tick now.
    pub async fn tick(&self) -> Result<TickOutcome> {
        tick(&self.engine).await
    }

    /// Disarm and stop the cron runtime. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        let mut cron = self.cron.lock().await;
        if cron.stopped {
            return Ok(());
        }
        cron.stopped = true;
        if let Some(job) = cron.job.take() {
            cron.scheduler.remove(&job).await?;
        }
        if cron.started {
            cron.scheduler.shutdown().await?;
        }
        info!("Scan scheduler stopped");
        Ok(())
    }
}

/// Skip if a run is in flight or scans are disabled, otherwise run.
async fn tick(engine: &Arc<ScanEngine>) -> Result<TickOutcome> {
    if engine.is_shutting_down() {
        return Ok(TickOutcome::SkippedShuttingDown);
    }
    if engine.is_scanning() {
        info!("Skipping scheduled scan, previous run still in progress");
        return Ok(TickOutcome::SkippedScanning);
    }
    if !engine.settings_enabled() {
        info!("Skipping scheduled scan, scans are disabled");
        return Ok(TickOutcome::SkippedDisabled);
    }

    match engine.scan_all(ScanTrigger::Scheduled).await {
        Ok(report) => Ok(TickOutcome::Completed(report)),
        // lost the race against a manual scan
        Err(ScanError::ScanInProgress) => {
            info!("Skipping scheduled scan, another run started");
            Ok(TickOutcome::SkippedScanning)
        }
        Err(ScanError::ShuttingDown) => Ok(TickOutcome::SkippedShuttingDown),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_expressions_get_seconds() {
        assert_eq!(normalize_cron("*/15 * * * *"), "0 */15 * * * *");
        assert_eq!(normalize_cron("  0 0 * * * *  "), "0 0 * * * *");
    }

    #[tokio::test]
    async fn validates_concurrency_and_cron() {
        assert!(validate_settings(&ScanSettings::default()).is_ok());
        assert!(validate_settings(&ScanSettings::new("*/30 * * * *", 1)).is_ok());

        assert!(matches!(
            validate_settings(&ScanSettings::new("0 0 * * * *", 0)),
            Err(ScanError::InvalidSettings { .. })
        ));
        assert!(matches!(
            validate_settings(&ScanSettings::new("every hour", 2)),
            Err(ScanError::InvalidSettings { .. })
        ));
        assert!(matches!(
            validate_settings(&ScanSettings::new("   ", 2)),
            Err(ScanError::InvalidSettings { .. })
        ));
        assert!(validate_settings(&ScanSettings::new("0 0 * * * *", MAX_CONCURRENCY)).is_ok());
        assert!(matches!(
            validate_settings(&ScanSettings::new("0 0 * * * *", MAX_CONCURRENCY + 1)),
            Err(ScanError::InvalidSettings { .. })
        ));
    }
}
