//! Job scanner daemon
//!
//! Scans the configured user's links on the persisted cron cadence until
//! interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use job_scanner::{DaemonConfig, HttpPageFetcher, JobScanner, PostgresStore, SiteRegistry};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,job_scanner=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting job scanner");

    let config = DaemonConfig::from_env().context("Failed to load configuration")?;

    let store = PostgresStore::connect(&config.database_url, config.user_id)
        .await
        .context("Failed to connect to database")?;
    store.migrate().await.context("Failed to run migrations")?;

    let fetcher = HttpPageFetcher::new(&config.scanner.http)?;
    let registry = SiteRegistry::with_defaults().context("Failed to build site registry")?;

    let scanner = JobScanner::new(
        Arc::new(store),
        Arc::new(fetcher),
        Arc::new(registry),
        config.scanner,
    )
    .await
    .context("Failed to create job scanner")?;

    let mut reports = scanner.subscribe();
    let report_logger = tokio::spawn(async move {
        loop {
            match reports.recv().await {
                Ok(report) if !report.flagged_links.is_empty() => {
                    tracing::warn!(
                        run_id = %report.run_id,
                        flagged = ?report.flagged_links,
                        "Links need attention after repeated failures"
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Report listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    scanner.start().await.context("Failed to start scheduler")?;
    tracing::info!(settings = ?scanner.get_settings(), "Job scanner running");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutdown signal received");
    scanner.shutdown().await.context("Failed to shut down cleanly")?;
    report_logger.abort();

    tracing::info!("Job scanner stopped");
    Ok(())
}
