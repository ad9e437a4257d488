use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Job, SiteId};
use crate::error::{FailureKind, ScanError};

/// What started a scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanTrigger {
    Scheduled,
    ManualLink,
    JobBackfill,
}

/// The thing a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ScanTarget {
    Link(Uuid),
    Job(Uuid),
    Run,
}

/// Classified failure, never a raw fetch or parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanFailure {
    pub target: ScanTarget,
    pub kind: FailureKind,
    pub message: String,
}

impl ScanFailure {
    pub fn from_error(target: ScanTarget, error: &ScanError) -> Self {
        Self {
            target,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LinkScanStatus {
    Succeeded {
        jobs_found: usize,
        jobs_new: usize,
        jobs_updated: usize,
        jobs_unchanged: usize,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
    /// Not started because the scanner is shutting down
    Skipped,
}

/// Result of scanning one link within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkOutcome {
    pub link_id: Uuid,
    pub site: SiteId,
    pub attempts: u32,
    /// Error count after this scan's bookkeeping was written
    pub scan_error_count: u32,
    pub status: LinkScanStatus,
}

impl LinkOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, LinkScanStatus::Failed { .. })
    }
}

/// Payload of a manual single-link scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkScanResult {
    pub new_jobs_count: usize,
    pub updated_jobs_count: usize,
    pub new_jobs: Vec<Job>,
}

/// Aggregate outcome of one scan run. Built fresh per run, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub run_id: Uuid,
    pub trigger: ScanTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub links_attempted: usize,
    pub links_failed: usize,
    pub jobs_found: usize,
    pub jobs_new: usize,
    pub jobs_updated: usize,
    pub jobs_unchanged: usize,
    pub jobs_failed: usize,
    pub links: Vec<LinkOutcome>,
    /// Links whose error count reached the attention threshold
    pub flagged_links: Vec<Uuid>,
    pub errors: Vec<ScanFailure>,
}

impl ScanReport {
    pub fn new(trigger: ScanTrigger) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            trigger,
            started_at: Utc::now(),
            finished_at: None,
            links_attempted: 0,
            links_failed: 0,
            jobs_found: 0,
            jobs_new: 0,
            jobs_updated: 0,
            jobs_unchanged: 0,
            jobs_failed: 0,
            links: Vec::new(),
            flagged_links: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Fold one link's outcome into the totals.
    pub fn record_link(&mut self, outcome: LinkOutcome, error_threshold: u32) {
        match &outcome.status {
            LinkScanStatus::Succeeded {
                jobs_found,
                jobs_new,
                jobs_updated,
                jobs_unchanged,
            } => {
                self.links_attempted += 1;
                self.jobs_found += jobs_found;
                self.jobs_new += jobs_new;
                self.jobs_updated += jobs_updated;
                self.jobs_unchanged += jobs_unchanged;
            }
            LinkScanStatus::Failed { kind, message } => {
                self.links_attempted += 1;
                self.links_failed += 1;
                self.errors.push(ScanFailure {
                    target: ScanTarget::Link(outcome.link_id),
                    kind: *kind,
                    message: message.clone(),
                });
            }
            LinkScanStatus::Skipped => {}
        }

        if error_threshold > 0 && outcome.scan_error_count >= error_threshold {
            self.flagged_links.push(outcome.link_id);
        }
        self.links.push(outcome);
    }

    pub fn record_job_failure(&mut self, job_id: Uuid, error: &ScanError) {
        self.jobs_failed += 1;
        self.errors
            .push(ScanFailure::from_error(ScanTarget::Job(job_id), error));
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.links_attempted == 0 && self.jobs_found == 0 && self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: LinkScanStatus, errors: u32) -> LinkOutcome {
        LinkOutcome {
            link_id: Uuid::new_v4(),
            site: SiteId::from("indeed"),
            attempts: 1,
            scan_error_count: errors,
            status,
        }
    }

    #[test]
    fn aggregates_success_and_failure() {
        let mut report = ScanReport::new(ScanTrigger::Scheduled);
        report.record_link(
            outcome(
                LinkScanStatus::Succeeded {
                    jobs_found: 6,
                    jobs_new: 5,
                    jobs_updated: 1,
                    jobs_unchanged: 0,
                },
                0,
            ),
            3,
        );
        report.record_link(
            outcome(
                LinkScanStatus::Failed {
                    kind: FailureKind::FetchTimeout,
                    message: "timeout".into(),
                },
                3,
            ),
            3,
        );
        let report = report.finish();

        assert_eq!(report.links_attempted, 2);
        assert_eq!(report.links_failed, 1);
        assert_eq!(report.jobs_new, 5);
        assert_eq!(report.jobs_updated, 1);
        assert_eq!(report.flagged_links.len(), 1);
        assert_eq!(report.errors[0].kind, FailureKind::FetchTimeout);
        assert!(report.finished_at.is_some());
    }

    #[test]
    fn skipped_links_are_not_attempts() {
        let mut report = ScanReport::new(ScanTrigger::Scheduled);
        report.record_link(outcome(LinkScanStatus::Skipped, 0), 3);
        assert_eq!(report.links_attempted, 0);
        assert_eq!(report.links.len(), 1);
    }
}
