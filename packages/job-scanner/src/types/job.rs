use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SiteId;

// ============================================================================
// ENUMS
// ============================================================================

/// User-facing posting status. Scans never overwrite it on existing jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    New,
    Applied,
    Archived,
    Deleted,
    Excluded,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Applied => "applied",
            JobStatus::Archived => "archived",
            JobStatus::Deleted => "deleted",
            JobStatus::Excluded => "excluded",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(JobStatus::New),
            "applied" => Ok(JobStatus::Applied),
            "archived" => Ok(JobStatus::Archived),
            "deleted" => Ok(JobStatus::Deleted),
            "excluded" => Ok(JobStatus::Excluded),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Where a job was first discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "linkId", rename_all = "snake_case")]
pub enum JobOrigin {
    Link(Uuid),
    /// Manually scanned, or detached after its link was deleted
    Manual,
}

impl JobOrigin {
    pub fn link_id(&self) -> Option<Uuid> {
        match self {
            JobOrigin::Link(id) => Some(*id),
            JobOrigin::Manual => None,
        }
    }
}

// ============================================================================
// CORE TYPES
// ============================================================================

/// A normalized job posting keyed by its canonical external URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    /// Dedup key, see [`crate::dedup::canonical_url`]
    pub canonical_url: String,
    /// URL as first seen on the board
    pub external_url: String,
    pub site: SiteId,
    pub origin: JobOrigin,
    pub title: String,
    pub company_name: String,
    pub location: Option<String>,
    pub salary: Option<String>,
    pub job_type: Option<String>,
    pub description: Option<String>,
    pub status: JobStatus,
    /// User-owned, untouched by scans
    pub labels: Vec<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    /// Bumped on every content write
    pub revision: i64,
}

/// Trim labels, drop blanks and repeats; first occurrence wins.
pub fn clean_labels(labels: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        let label = label.trim();
        if !label.is_empty() && !cleaned.iter().any(|l| l == label) {
            cleaned.push(label.to_string());
        }
    }
    cleaned
}

/// A posting as extracted from a page, before reconciliation.
///
/// `None` fields mean "not present on the page" and never clear stored data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCandidate {
    pub external_url: String,
    pub title: Option<String>,
    pub company_name: Option<String>,
    pub location: Option<String>,
    pub salary: Option<String>,
    pub job_type: Option<String>,
    pub description: Option<String>,
}

impl JobCandidate {
    pub fn new(external_url: impl Into<String>) -> Self {
        Self {
            external_url: external_url.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company_name = Some(company.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_salary(mut self, salary: impl Into<String>) -> Self {
        self.salary = Some(salary.into());
        self
    }

    pub fn with_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Overlay fields present in `other` onto `self`.
    pub fn absorb(&mut self, other: JobCandidate) {
        fn take(slot: &mut Option<String>, value: Option<String>) {
            if value.is_some() {
                *slot = value;
            }
        }
        take(&mut self.title, other.title);
        take(&mut self.company_name, other.company_name);
        take(&mut self.location, other.location);
        take(&mut self.salary, other.salary);
        take(&mut self.job_type, other.job_type);
        take(&mut self.description, other.description);
    }
}

// ============================================================================
// QUERIES
// ============================================================================

/// Cursor-paginated job listing query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub limit: usize,
    pub after: Option<String>,
}

impl Default for JobQuery {
    fn default() -> Self {
        Self {
            status: None,
            limit: 50,
            after: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub next_page_token: Option<String>,
}
