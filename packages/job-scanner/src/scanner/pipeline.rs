//! Fetch + extract with a deadline, and the retry loop around it.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::RetryPolicy;
use crate::error::{FetchError, ParseError, Result, ScanError};
use crate::traits::{FetchOptions, PageContent, PageFetcher, SiteAdapter};
use crate::types::JobCandidate;

/// One of the adapter's two extraction operations.
pub(crate) type Extractor<T> = fn(&dyn SiteAdapter, &PageContent) -> std::result::Result<T, ParseError>;

pub(crate) fn listing(
    adapter: &dyn SiteAdapter,
    page: &PageContent,
) -> std::result::Result<Vec<JobCandidate>, ParseError> {
    adapter.extract_listing(page)
}

pub(crate) fn detail(
    adapter: &dyn SiteAdapter,
    page: &PageContent,
) -> std::result::Result<JobCandidate, ParseError> {
    adapter.extract_detail(page)
}

/// Fetch `url` and run `extract` on the page, all under one deadline.
///
/// Extraction runs on the blocking pool: HTML parsing is CPU bound and an
/// adapter panic surfaces as [`ScanError::WorkerCrashed`] instead of taking
/// the worker down. Exceeding the deadline is a [`FetchError::Timeout`].
pub(crate) async fn fetch_and_extract<T>(
    fetcher: &dyn PageFetcher,
    adapter: Arc<dyn SiteAdapter>,
    url: &Url,
    timeout: Duration,
    extract: Extractor<T>,
) -> Result<T>
where
    T: Send + 'static,
{
    let work = async {
        let page = fetcher.fetch(url, &FetchOptions { timeout }).await?;
        debug!(url = %page.url, bytes = page.html.len(), "Extracting page");
        tokio::task::spawn_blocking(move || extract(adapter.as_ref(), &page))
            .await
            .map_err(crashed)?
            .map_err(ScanError::from)
    };

    match tokio::time::timeout(timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            url: url.to_string(),
            timeout,
        }
        .into()),
    }
}

fn should_retry(policy: &RetryPolicy, error: &ScanError) -> bool {
    error.is_retryable() || (policy.retry_parse_errors && matches!(error, ScanError::Parse(_)))
}

/// Run `op` until it succeeds or the retry budget is spent.
///
/// Returns the last result and the number of attempts made. Stops early
/// (without sleeping) once `cancel` fires.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    target: &str,
    mut op: F,
) -> (Result<T>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match op().await {
            Ok(value) => return (Ok(value), attempt),
            Err(e) => e,
        };

        if attempt >= max_attempts || !should_retry(policy, &error) || cancel.is_cancelled() {
            return (Err(error), attempt);
        }

        let delay = policy.delay_for(attempt);
        warn!(
            target_id = %target,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying after transient failure"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return (Err(error), attempt),
        }
    }
}

/// Classify a task that panicked or was aborted.
pub(crate) fn crashed(error: JoinError) -> ScanError {
    let reason = if error.is_panic() {
        panic_message(error.into_panic())
    } else {
        "task was cancelled".to_string()
    };
    ScanError::WorkerCrashed { reason }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::types::SiteId;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_millis(1))
    }

    fn timeout_error() -> ScanError {
        FetchError::Timeout {
            url: "https://example.com".into(),
            timeout: Duration::from_secs(1),
        }
        .into()
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let (result, attempts) = with_retry(&fast_policy(2), &CancellationToken::new(), "t", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(timeout_error())
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let (result, attempts) = with_retry(&fast_policy(2), &CancellationToken::new(), "t", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(timeout_error())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn parse_errors_fail_fast_by_default() {
        let (result, attempts) = with_retry(&fast_policy(3), &CancellationToken::new(), "t", || async {
            Err::<(), _>(ScanError::from(ParseError::new(&SiteId::from("x"), "u", "layout")))
        })
        .await;

        assert!(matches!(result, Err(ScanError::Parse(_))));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_retrying() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (_, attempts) = with_retry(&fast_policy(5), &cancel, "t", || async {
            Err::<(), _>(timeout_error())
        })
        .await;
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn join_error_from_panic_is_classified() {
        let err = tokio::spawn(async { panic!("adapter exploded") })
            .await
            .unwrap_err();
        match crashed(err) {
            ScanError::WorkerCrashed { reason } => assert!(reason.contains("adapter exploded")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
