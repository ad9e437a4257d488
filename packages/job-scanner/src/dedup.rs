//! Dedup and merge rules shared by every [`ScanStore`](crate::traits::ScanStore).
//!
//! The dedup key is the canonical URL: scheme and host lowercased, default
//! port, fragment, trailing slash and known tracking parameters removed, the
//! remaining query pairs sorted. Merging overwrites content fields present in
//! the candidate and never touches `status` or `labels`.

use std::collections::HashSet;
use std::fmt::Write as _;

use chrono::{DateTime, SubsecRound, Utc};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use url::Url;
use uuid::Uuid;

use crate::types::{Job, JobCandidate, JobOrigin, JobStatus, SiteId};

lazy_static! {
    static ref TRACKING_PARAMS: HashSet<&'static str> = [
        // ad click ids
        "gclid", "dclid", "fbclid", "msclkid", "yclid",
        // mailers
        "mc_cid", "mc_eid", "_hsenc", "_hsmi",
        // linkedin
        "ref", "refid", "trackingid", "trk", "trkinfo", "position", "pagenum",
        // indeed
        "from", "tk", "xkcb", "vjs",
    ]
    .into_iter()
    .collect();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("static regex");
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(key.as_str())
}

/// Normalize a posting URL into its dedup key.
pub fn canonical_url(raw: &str) -> Result<String, url::ParseError> {
    let url = Url::parse(raw.trim())?;
    let host = url
        .host_str()
        .ok_or(url::ParseError::EmptyHost)?
        .to_ascii_lowercase();

    let mut canonical = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        let _ = write!(canonical, ":{port}");
    }
    canonical.push_str(url.path().trim_end_matches('/'));

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if !params.is_empty() {
        params.sort();
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        canonical.push('?');
        canonical.push_str(&query);
    }

    Ok(canonical)
}

/// Collapse runs of whitespace (including non-breaking spaces) and trim.
pub fn clean_text(value: &str) -> String {
    WHITESPACE
        .replace_all(&value.replace('\u{a0}', " "), " ")
        .trim()
        .to_string()
}

fn clean_field(value: Option<String>) -> Option<String> {
    value.map(|v| clean_text(&v)).filter(|v| !v.is_empty())
}

/// Trim every field; blank fields become `None` so they never clear stored data.
pub fn normalize_candidate(candidate: JobCandidate) -> JobCandidate {
    JobCandidate {
        external_url: candidate.external_url.trim().to_string(),
        title: clean_field(candidate.title),
        company_name: clean_field(candidate.company_name),
        location: clean_field(candidate.location),
        salary: clean_field(candidate.salary),
        job_type: clean_field(candidate.job_type),
        // keep paragraph breaks in descriptions
        description: candidate
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
    }
}

/// A candidate batch keyed by canonical URL, in first-seen order.
#[derive(Debug, Default)]
pub struct CollapsedBatch {
    pub entries: IndexMap<String, JobCandidate>,
    pub rejected: usize,
}

impl CollapsedBatch {
    /// Entries sorted by canonical URL.
    ///
    /// Writers that lock one row per entry take the locks in this order, so
    /// two overlapping batches always contend on the same row first.
    pub fn into_key_order(self) -> Vec<(String, JobCandidate)> {
        let mut entries = self.entries;
        entries.sort_keys();
        entries.into_iter().collect()
    }
}

/// Fold candidates sharing a canonical URL into one entry.
///
/// Later duplicates overlay the fields they carry, mirroring the merge rule.
pub fn collapse_batch(candidates: Vec<JobCandidate>) -> CollapsedBatch {
    let mut batch = CollapsedBatch::default();
    for candidate in candidates {
        let candidate = normalize_candidate(candidate);
        let key = match canonical_url(&candidate.external_url) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(url = %candidate.external_url, error = %e, "Dropping candidate with invalid URL");
                batch.rejected += 1;
                continue;
            }
        };
        match batch.entries.get_mut(&key) {
            Some(existing) => existing.absorb(candidate),
            None => {
                batch.entries.insert(key, candidate);
            }
        }
    }
    batch
}

/// Build a fresh job (status `new`) from a normalized candidate.
pub fn new_job(
    origin: JobOrigin,
    site: &SiteId,
    canonical_url: String,
    candidate: JobCandidate,
    seen_at: DateTime<Utc>,
) -> Job {
    // microsecond precision, matching timestamptz and the page cursor
    let seen_at = seen_at.trunc_subsecs(6);
    Job {
        id: Uuid::new_v4(),
        canonical_url,
        external_url: candidate.external_url,
        site: site.clone(),
        origin,
        title: candidate.title.unwrap_or_default(),
        company_name: candidate.company_name.unwrap_or_default(),
        location: candidate.location,
        salary: candidate.salary,
        job_type: candidate.job_type,
        description: candidate.description,
        status: JobStatus::New,
        labels: Vec::new(),
        first_seen_at: seen_at,
        last_seen_at: seen_at,
        revision: 0,
    }
}

/// Overwrite content fields present in `candidate`.
///
/// Returns whether any field changed. `status`, `labels`, URLs and
/// timestamps are left to the caller.
pub fn merge_candidate(job: &mut Job, candidate: &JobCandidate) -> bool {
    fn merge_required(slot: &mut String, value: &Option<String>) -> bool {
        match value {
            Some(v) if v != slot => {
                slot.clone_from(v);
                true
            }
            _ => false,
        }
    }

    fn merge_optional(slot: &mut Option<String>, value: &Option<String>) -> bool {
        match value {
            Some(v) if slot.as_ref() != Some(v) => {
                *slot = Some(v.clone());
                true
            }
            _ => false,
        }
    }

    // non-short-circuiting on purpose: every field must be applied
    let changed = [
        merge_required(&mut job.title, &candidate.title),
        merge_required(&mut job.company_name, &candidate.company_name),
        merge_optional(&mut job.location, &candidate.location),
        merge_optional(&mut job.salary, &candidate.salary),
        merge_optional(&mut job.job_type, &candidate.job_type),
        merge_optional(&mut job.description, &candidate.description),
    ];
    changed.contains(&true)
}

/// Apply a merge and the bookkeeping that goes with it.
pub fn apply_merge(job: &mut Job, candidate: &JobCandidate, seen_at: DateTime<Utc>) -> bool {
    let changed = merge_candidate(job, candidate);
    if changed {
        job.revision += 1;
    }
    if seen_at > job.last_seen_at {
        job.last_seen_at = seen_at;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_url_normalizes_case_slash_and_tracking() {
        let a = canonical_url("HTTPS://WWW.LinkedIn.com/jobs/view/123/?trk=public&refId=abc").unwrap();
        let b = canonical_url("https://www.linkedin.com/jobs/view/123").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, "https://www.linkedin.com/jobs/view/123");
    }

    #[test]
    fn canonical_url_keeps_meaningful_params_sorted() {
        let url = canonical_url("https://www.indeed.com/viewjob?jk=42&utm_source=x&from=serp&a=1").unwrap();
        assert_eq!(url, "https://www.indeed.com/viewjob?a=1&jk=42");
    }

    #[test]
    fn canonical_url_drops_default_port_and_fragment() {
        let url = canonical_url("https://example.com:443/jobs/1/#apply").unwrap();
        assert_eq!(url, "https://example.com/jobs/1");
        let url = canonical_url("http://example.com:8080/jobs").unwrap();
        assert_eq!(url, "http://example.com:8080/jobs");
    }

    #[test]
    fn canonical_url_keeps_path_case() {
        let url = canonical_url("https://example.com/Jobs/ABC").unwrap();
        assert_eq!(url, "https://example.com/Jobs/ABC");
    }

    #[test]
    fn canonical_url_rejects_garbage() {
        assert!(canonical_url("not a url").is_err());
        assert!(canonical_url("/relative/path").is_err());
    }

    #[test]
    fn collapse_batch_merges_duplicates() {
        let batch = collapse_batch(vec![
            JobCandidate::new("https://example.com/jobs/1").with_title("Engineer"),
            JobCandidate::new("https://EXAMPLE.com/jobs/1/?utm_medium=email").with_company("Acme"),
            JobCandidate::new("https://example.com/jobs/2").with_title("Designer"),
            JobCandidate::new("::garbage::"),
        ]);

        assert_eq!(batch.entries.len(), 2);
        assert_eq!(batch.rejected, 1);
        let first = &batch.entries["https://example.com/jobs/1"];
        assert_eq!(first.title.as_deref(), Some("Engineer"));
        assert_eq!(first.company_name.as_deref(), Some("Acme"));
    }

    #[test]
    fn key_order_is_independent_of_listing_order() {
        let forward = collapse_batch(vec![
            JobCandidate::new("https://example.com/jobs/b").with_title("B"),
            JobCandidate::new("https://example.com/jobs/a").with_title("A"),
        ]);
        let reverse = collapse_batch(vec![
            JobCandidate::new("https://example.com/jobs/a").with_title("A"),
            JobCandidate::new("https://example.com/jobs/b").with_title("B"),
        ]);

        let keys = |batch: CollapsedBatch| -> Vec<String> {
            batch.into_key_order().into_iter().map(|(key, _)| key).collect()
        };
        let expected = ["https://example.com/jobs/a", "https://example.com/jobs/b"];
        assert_eq!(keys(forward), expected);
        assert_eq!(keys(reverse), expected);
    }

    #[test]
    fn normalize_blanks_become_none() {
        let candidate = normalize_candidate(
            JobCandidate::new(" https://example.com/1 ")
                .with_title("  Senior\u{a0}\n Engineer ")
                .with_salary("   "),
        );
        assert_eq!(candidate.external_url, "https://example.com/1");
        assert_eq!(candidate.title.as_deref(), Some("Senior Engineer"));
        assert_eq!(candidate.salary, None);
    }

    fn stored_job() -> Job {
        let candidate = JobCandidate::new("https://example.com/1")
            .with_title("Engineer")
            .with_company("Acme")
            .with_location("Remote");
        new_job(
            JobOrigin::Manual,
            &SiteId::from("test"),
            "https://example.com/1".into(),
            candidate,
            Utc::now(),
        )
    }

    #[test]
    fn merge_overwrites_present_fields_only() {
        let mut job = stored_job();
        job.status = JobStatus::Applied;

        let changed = merge_candidate(
            &mut job,
            &JobCandidate::new("https://example.com/1").with_salary("$100k"),
        );

        assert!(changed);
        assert_eq!(job.salary.as_deref(), Some("$100k"));
        assert_eq!(job.location.as_deref(), Some("Remote"));
        assert_eq!(job.title, "Engineer");
        assert_eq!(job.status, JobStatus::Applied);
    }

    #[test]
    fn merge_identical_is_noop() {
        let mut job = stored_job();
        let before = job.clone();
        let later = before.last_seen_at + chrono::Duration::minutes(5);

        let changed = apply_merge(
            &mut job,
            &JobCandidate::new("https://example.com/1")
                .with_title("Engineer")
                .with_company("Acme"),
            later,
        );

        assert!(!changed);
        assert_eq!(job.revision, before.revision);
        assert_eq!(job.last_seen_at, later);
    }
}
