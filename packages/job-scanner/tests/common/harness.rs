//! Scanner wired to an in-memory store and a scripted fetcher.

use std::sync::Arc;
use std::time::Duration;

use job_scanner::testing::{testboard_registry, MockPageFetcher};
use job_scanner::{JobScanner, MemoryStore, RetryPolicy, ScanReport, ScannerConfig, SiteRegistry};
use tokio::sync::broadcast;

pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub fetcher: MockPageFetcher,
    pub scanner: Arc<JobScanner>,
}

/// Short deadlines and near-instant retries so failure paths run fast.
pub fn fast_config() -> ScannerConfig {
    ScannerConfig::default()
        .with_fetch_timeout(Duration::from_millis(200))
        .with_retry(
            RetryPolicy::default()
                .with_max_attempts(2)
                .with_base_delay(Duration::from_millis(5)),
        )
}

impl TestHarness {
    pub async fn new(fetcher: MockPageFetcher) -> Self {
        Self::with_config(fetcher, fast_config()).await
    }

    pub async fn with_config(fetcher: MockPageFetcher, config: ScannerConfig) -> Self {
        let registry = testboard_registry().expect("fixture registry");
        Self::build(Arc::new(MemoryStore::new()), fetcher, registry, config).await
    }

    pub async fn build(
        store: Arc<MemoryStore>,
        fetcher: MockPageFetcher,
        registry: SiteRegistry,
        config: ScannerConfig,
    ) -> Self {
        init_tracing();
        let scanner = JobScanner::new(
            store.clone(),
            Arc::new(fetcher.clone()),
            Arc::new(registry),
            config,
        )
        .await
        .expect("Failed to build scanner");

        Self {
            store,
            fetcher,
            scanner: Arc::new(scanner),
        }
    }
}

/// Respect RUST_LOG; run with `RUST_LOG=debug cargo test -- --nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wait for the next published report, failing the test after `within`.
pub async fn next_report(
    reports: &mut broadcast::Receiver<ScanReport>,
    within: Duration,
) -> ScanReport {
    tokio::time::timeout(within, reports.recv())
        .await
        .expect("no scan report published in time")
        .expect("report channel closed")
}

/// Poll until `check` holds, failing the test after `within`.
pub async fn eventually<F>(within: Duration, mut check: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(within, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
