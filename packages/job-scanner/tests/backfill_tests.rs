//! Integration tests for detail backfill and the background scans started
//! when a link is created.

mod common;

use std::sync::Arc;
use std::time::Duration;

use crate::common::{create_link, job_url, listing_for, next_report, search_url, TestHarness};
use job_scanner::testing::{detail_page, MockPageFetcher, MockResponse};
use job_scanner::{FailureKind, JobStatus, LinkScanStatus, ScanStore, ScanTarget, ScanTrigger};

#[tokio::test]
async fn scan_jobs_fills_in_details_and_keeps_order_and_status() {
    let a = search_url("a");
    let fetcher = MockPageFetcher::new()
        .with_page(&a, listing_for(&[1, 2, 3]))
        .with_page(&job_url(1), detail_page("Job 1", "Ferris Inc", "Own the scheduler."))
        .with_page(&job_url(3), detail_page("Job 3", "Ferris Inc", "Own the parser."));
    let ctx = TestHarness::new(fetcher).await;
    let link = create_link(&ctx.store, &a).await;

    let mut jobs = ctx.scanner.scan_link(link.id).await.unwrap().new_jobs;
    jobs.sort_by(|x, y| x.external_url.cmp(&y.external_url));
    ctx.store
        .update_job_status(jobs[0].id, JobStatus::Applied)
        .await
        .unwrap();

    let mut reports = ctx.scanner.subscribe();
    let scanned = ctx.scanner.scan_jobs(jobs.clone()).await.unwrap();

    let ids: Vec<_> = scanned.iter().map(|job| job.id).collect();
    let expected: Vec<_> = jobs.iter().map(|job| job.id).collect();
    assert_eq!(ids, expected);

    assert_eq!(scanned[0].description.as_deref(), Some("Own the scheduler."));
    assert_eq!(scanned[0].job_type.as_deref(), Some("Full time"));
    assert_eq!(scanned[0].status, JobStatus::Applied);
    assert_eq!(scanned[2].description.as_deref(), Some("Own the parser."));
    // job 2 has no detail page: returned unchanged, failure reported
    assert_eq!(scanned[1], jobs[1]);

    let report = next_report(&mut reports, Duration::from_secs(1)).await;
    assert_eq!(report.trigger, ScanTrigger::JobBackfill);
    assert_eq!(report.jobs_updated, 2);
    assert_eq!(report.jobs_failed, 1);
    assert_eq!(report.errors[0].target, ScanTarget::Job(jobs[1].id));
    assert_eq!(report.errors[0].kind, FailureKind::Network);
    // a user's backfill never counts against the link
    let stored = ctx.store.get_link(link.id).await.unwrap().unwrap();
    assert_eq!(stored.scan_error_count, 0);
}

#[tokio::test]
async fn repeated_backfill_writes_nothing() {
    let a = search_url("a");
    let fetcher = MockPageFetcher::new()
        .with_page(&a, listing_for(&[1]))
        .with_page(&job_url(1), detail_page("Job 1", "Ferris Inc", "Same text."));
    let ctx = TestHarness::new(fetcher).await;
    let link = create_link(&ctx.store, &a).await;
    let jobs = ctx.scanner.scan_link(link.id).await.unwrap().new_jobs;

    ctx.scanner.scan_jobs(jobs.clone()).await.unwrap();
    let writes = ctx.store.job_writes().await;
    ctx.scanner.scan_jobs(jobs).await.unwrap();

    assert_eq!(ctx.store.job_writes().await, writes);
}

#[tokio::test]
async fn failed_background_backfill_counts_against_the_link() {
    let a = search_url("a");
    let fetcher = MockPageFetcher::new()
        .with_page(&a, listing_for(&[1, 2]))
        .with_page(&job_url(1), detail_page("Job 1", "Ferris Inc", "Fine."))
        .with_response(&job_url(2), MockResponse::Hang);
    let ctx = TestHarness::new(fetcher).await;
    let link = create_link(&ctx.store, &a).await;
    let jobs = ctx.scanner.scan_link(link.id).await.unwrap().new_jobs;

    let mut reports = ctx.scanner.subscribe();
    ctx.scanner
        .on_link_created(link.clone(), jobs)
        .await
        .unwrap();

    let report = next_report(&mut reports, Duration::from_secs(1)).await;
    assert_eq!(report.trigger, ScanTrigger::JobBackfill);
    assert_eq!(report.jobs_failed, 1);
    assert_eq!(report.errors[0].kind, FailureKind::FetchTimeout);

    let stored = ctx.store.get_link(link.id).await.unwrap().unwrap();
    assert_eq!(stored.scan_error_count, 1);
    assert_eq!(stored.last_error.as_deref(), Some("1 of 2 job details failed to load"));
    assert!(ctx
        .store
        .find_job_by_url(&job_url(1))
        .await
        .unwrap()
        .description
        .is_some());
}

#[tokio::test]
async fn initial_scan_creates_and_describes_jobs() {
    let a = search_url("a");
    let fetcher = MockPageFetcher::new()
        .with_page(&a, listing_for(&[1]))
        .with_page(&job_url(1), detail_page("Job 1", "Ferris Inc", "Welcome aboard."));
    let ctx = TestHarness::new(fetcher).await;
    let link = create_link(&ctx.store, &a).await;

    let mut reports = ctx.scanner.subscribe();
    ctx.scanner.spawn_initial_scan(link.clone()).await.unwrap();

    let report = next_report(&mut reports, Duration::from_secs(1)).await;
    assert_eq!(report.trigger, ScanTrigger::ManualLink);
    assert_eq!(report.jobs_new, 1);
    assert_eq!(report.jobs_updated, 1);

    let job = ctx.store.find_job_by_url(&job_url(1)).await.unwrap();
    assert_eq!(job.description.as_deref(), Some("Welcome aboard."));
    assert!(!ctx.scanner.is_scanning());
}

#[tokio::test]
async fn background_scan_blocked_by_a_run_is_recorded_not_dropped() {
    let (a, b) = (search_url("a"), search_url("b"));
    let fetcher = MockPageFetcher::new()
        .with_response(
            &a,
            MockResponse::Delayed {
                delay: Duration::from_millis(300),
                html: listing_for(&[1]),
            },
        )
        .with_page(&b, listing_for(&[2]));
    let ctx = TestHarness::new(fetcher).await;
    create_link(&ctx.store, &a).await;

    let scanner = Arc::clone(&ctx.scanner);
    let run = tokio::spawn(async move { scanner.scan_all().await });
    common::eventually(Duration::from_secs(1), || ctx.scanner.is_scanning()).await;

    // created while the run is in flight; not part of it
    let late = create_link(&ctx.store, &b).await;
    let mut reports = ctx.scanner.subscribe();
    ctx.scanner.spawn_initial_scan(late.clone()).await.unwrap();

    let report = next_report(&mut reports, Duration::from_secs(1)).await;
    let outcome = report.links.iter().find(|o| o.link_id == late.id).unwrap();
    assert!(matches!(
        outcome.status,
        LinkScanStatus::Failed { kind: FailureKind::ScanInProgress, .. }
    ));
    let stored = ctx.store.get_link(late.id).await.unwrap().unwrap();
    assert_eq!(stored.scan_error_count, 1);

    run.await.unwrap().unwrap();
    // a later manual rescan picks it up
    assert_eq!(ctx.scanner.scan_link(late.id).await.unwrap().new_jobs_count, 1);
}

#[tokio::test]
async fn backfill_for_an_unknown_site_fails_per_job() {
    let a = search_url("a");
    let fetcher = MockPageFetcher::new().with_page(&a, listing_for(&[1]));
    let ctx = TestHarness::new(fetcher).await;
    let link = create_link(&ctx.store, &a).await;
    let mut jobs = ctx.scanner.scan_link(link.id).await.unwrap().new_jobs;
    jobs[0].site = "glassdoor".into();

    let scanned = ctx.scanner.scan_jobs(jobs.clone()).await.unwrap();

    assert_eq!(scanned, jobs);
    assert!(ctx.fetcher.call_count(&job_url(1)) == 0);
    assert!(!ctx.scanner.is_scanning());
}
