use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{clamp_page_size, decode_page_token, encode_page_token};
use crate::dedup::{self, apply_merge, collapse_batch};
use crate::error::{StoreError, StoreResult};
use crate::traits::{LinkScanCommit, MergeResult, ReconcileOutcome, ScanStore};
use crate::types::{
    clean_labels, Job, JobCandidate, JobOrigin, JobPage, JobQuery, JobStatus, Link, LinkUpdate,
    ScanSettings, SiteId,
};

const LINK_COLUMNS: &str = "id, site, title, url, enabled, created_at, last_scanned_at, \
     scan_error_count, last_error";

const JOB_COLUMNS: &str = "id, link_id, site, canonical_url, external_url, title, company_name, \
     location, salary, job_type, description, status, labels, first_seen_at, last_seen_at, revision";

// ============================================================================
// ROW MAPPING
// ============================================================================

#[derive(sqlx::FromRow)]
struct LinkRow {
    id: Uuid,
    site: String,
    title: String,
    url: String,
    enabled: bool,
    created_at: DateTime<Utc>,
    last_scanned_at: Option<DateTime<Utc>>,
    scan_error_count: i32,
    last_error: Option<String>,
}

impl TryFrom<LinkRow> for Link {
    type Error = StoreError;

    fn try_from(row: LinkRow) -> Result<Self, Self::Error> {
        let url = row
            .url
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("link {} has invalid url: {e}", row.id)))?;
        Ok(Link {
            id: row.id,
            site: SiteId::new(row.site),
            title: row.title,
            url,
            enabled: row.enabled,
            created_at: row.created_at,
            last_scanned_at: row.last_scanned_at,
            scan_error_count: row.scan_error_count.max(0) as u32,
            last_error: row.last_error,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    link_id: Option<Uuid>,
    site: String,
    canonical_url: String,
    external_url: String,
    title: String,
    company_name: String,
    location: Option<String>,
    salary: Option<String>,
    job_type: Option<String>,
    description: Option<String>,
    status: String,
    labels: Vec<String>,
    first_seen_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    revision: i64,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<JobStatus>().map_err(StoreError::Corrupt)?;
        Ok(Job {
            id: row.id,
            canonical_url: row.canonical_url,
            external_url: row.external_url,
            site: SiteId::new(row.site),
            origin: row.link_id.map_or(JobOrigin::Manual, JobOrigin::Link),
            title: row.title,
            company_name: row.company_name,
            location: row.location,
            salary: row.salary,
            job_type: row.job_type,
            description: row.description,
            status,
            labels: row.labels,
            first_seen_at: row.first_seen_at,
            last_seen_at: row.last_seen_at,
            revision: row.revision,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SettingsRow {
    cron_expression: String,
    max_concurrency: i32,
    enabled: bool,
}

// ============================================================================
// STORE
// ============================================================================

/// Postgres-backed store scoped to one user's account.
///
/// Canonical URLs are unique per user (`UNIQUE (user_id, canonical_url)`);
/// reconcile inserts with `ON CONFLICT DO NOTHING` and merges the existing
/// row under `SELECT ... FOR UPDATE`, so concurrent link scans never create
/// duplicates or lose updates.
pub struct PostgresStore {
    pool: PgPool,
    user_id: Uuid,
}

impl PostgresStore {
    pub fn new(pool: PgPool, user_id: Uuid) -> Self {
        Self { pool, user_id }
    }

    pub async fn connect(database_url: &str, user_id: Uuid) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool, user_id))
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn reconcile_in_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        origin: JobOrigin,
        site: &SiteId,
        candidates: Vec<JobCandidate>,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<ReconcileOutcome> {
        let batch = collapse_batch(candidates);
        let mut outcome = ReconcileOutcome {
            rejected: batch.rejected,
            ..Default::default()
        };

        // fixed lock order: overlapping concurrent scans cannot deadlock
        for (key, candidate) in batch.into_key_order() {
            let fresh = dedup::new_job(origin, site, key.clone(), candidate.clone(), seen_at);
            if let Some(job) = self.insert_if_absent(tx, &fresh).await? {
                outcome.new_jobs.push(job);
                continue;
            }

            let mut existing = self.lock_job_by_url(tx, &key).await?;
            if apply_merge(&mut existing, &candidate, seen_at) {
                self.write_job_content(tx, &existing).await?;
                outcome.updated_jobs.push(existing);
            } else {
                self.touch_job(tx, existing.id, seen_at).await?;
                outcome.unchanged += 1;
            }
        }

        Ok(outcome)
    }

    async fn insert_if_absent(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        job: &Job,
    ) -> StoreResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO jobs (
                id, user_id, link_id, site, canonical_url, external_url, title, company_name,
                location, salary, job_type, description, status, labels,
                first_seen_at, last_seen_at, revision
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (user_id, canonical_url) DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.id)
        .bind(self.user_id)
        .bind(job.origin.link_id())
        .bind(job.site.as_str())
        .bind(&job.canonical_url)
        .bind(&job.external_url)
        .bind(&job.title)
        .bind(&job.company_name)
        .bind(&job.location)
        .bind(&job.salary)
        .bind(&job.job_type)
        .bind(&job.description)
        .bind(job.status.as_str())
        .bind(&job.labels)
        .bind(job.first_seen_at)
        .bind(job.last_seen_at)
        .bind(job.revision)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn lock_job_by_url(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        canonical_url: &str,
    ) -> StoreResult<Job> {
        let row: JobRow = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE user_id = $1 AND canonical_url = $2 FOR UPDATE"
        ))
        .bind(self.user_id)
        .bind(canonical_url)
        .fetch_one(&mut **tx)
        .await?;
        row.try_into()
    }

    async fn lock_job(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        id: Uuid,
    ) -> StoreResult<Job> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE user_id = $1 AND id = $2 FOR UPDATE"
        ))
        .bind(self.user_id)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        row.ok_or(StoreError::JobNotFound { id })?.try_into()
    }

    /// Content fields only: status and labels belong to the user.
    async fn write_job_content(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        job: &Job,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET title = $1,
                company_name = $2,
                location = $3,
                salary = $4,
                job_type = $5,
                description = $6,
                last_seen_at = $7,
                revision = $8
            WHERE id = $9 AND user_id = $10
            "#,
        )
        .bind(&job.title)
        .bind(&job.company_name)
        .bind(&job.location)
        .bind(&job.salary)
        .bind(&job.job_type)
        .bind(&job.description)
        .bind(job.last_seen_at)
        .bind(job.revision)
        .bind(job.id)
        .bind(self.user_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn touch_job(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        id: Uuid,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE jobs SET last_seen_at = GREATEST(last_seen_at, $1) WHERE id = $2 AND user_id = $3",
        )
        .bind(seen_at)
        .bind(id)
        .bind(self.user_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ScanStore for PostgresStore {
    // ========================================================================
    // LINKS
    // ========================================================================

    async fn list_links(&self) -> StoreResult<Vec<Link>> {
        let rows: Vec<LinkRow> = sqlx::query_as(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(self.user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Link::try_from).collect()
    }

    async fn get_link(&self, id: Uuid) -> StoreResult<Option<Link>> {
        let row: Option<LinkRow> = sqlx::query_as(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE user_id = $1 AND id = $2"
        ))
        .bind(self.user_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Link::try_from).transpose()
    }

    async fn insert_link(&self, link: Link) -> StoreResult<Link> {
        let row: LinkRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO links (
                id, user_id, site, title, url, enabled, created_at,
                last_scanned_at, scan_error_count, last_error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {LINK_COLUMNS}
            "#
        ))
        .bind(link.id)
        .bind(self.user_id)
        .bind(link.site.as_str())
        .bind(&link.title)
        .bind(link.url.as_str())
        .bind(link.enabled)
        .bind(link.created_at)
        .bind(link.last_scanned_at)
        .bind(link.scan_error_count as i32)
        .bind(&link.last_error)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn update_link(&self, id: Uuid, update: &LinkUpdate) -> StoreResult<Link> {
        let row: Option<LinkRow> = sqlx::query_as(&format!(
            r#"
            UPDATE links
            SET title = COALESCE($1, title),
                url = COALESCE($2, url),
                enabled = COALESCE($3, enabled)
            WHERE user_id = $4 AND id = $5
            RETURNING {LINK_COLUMNS}
            "#
        ))
        .bind(&update.title)
        .bind(update.url.as_ref().map(|url| url.as_str()))
        .bind(update.enabled)
        .bind(self.user_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(StoreError::LinkNotFound { id })?.try_into()
    }

    async fn delete_link(&self, id: Uuid) -> StoreResult<()> {
        // jobs.link_id is ON DELETE SET NULL, which detaches them to Manual
        let result = sqlx::query("DELETE FROM links WHERE user_id = $1 AND id = $2")
            .bind(self.user_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::LinkNotFound { id });
        }
        Ok(())
    }

    // ========================================================================
    // JOBS
    // ========================================================================

    async fn get_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE user_id = $1 AND id = $2"
        ))
        .bind(self.user_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Job::try_from).transpose()
    }

    async fn list_jobs(&self, query: &JobQuery) -> StoreResult<JobPage> {
        let cursor = query.after.as_deref().map(decode_page_token).transpose()?;
        let limit = clamp_page_size(query.limit);

        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE user_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR (first_seen_at, id) < ($3, $4))
            ORDER BY first_seen_at DESC, id DESC
            LIMIT $5
            "#
        ))
        .bind(self.user_id)
        .bind(query.status.map(|s| s.as_str()))
        .bind(cursor.map(|(ts, _)| ts))
        .bind(cursor.map(|(_, id)| id))
        .bind(limit as i64 + 1)
        .fetch_all(&self.pool)
        .await?;

        let has_more = rows.len() > limit;
        let jobs = rows
            .into_iter()
            .take(limit)
            .map(Job::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        let next_page_token = match jobs.last() {
            Some(last) if has_more => Some(encode_page_token(last.first_seen_at, last.id)),
            _ => None,
        };

        Ok(JobPage {
            jobs,
            next_page_token,
        })
    }

    async fn update_job_status(&self, id: Uuid, status: JobStatus) -> StoreResult<Job> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs SET status = $1 WHERE user_id = $2 AND id = $3 RETURNING {JOB_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(self.user_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(StoreError::JobNotFound { id })?.try_into()
    }

    async fn update_job_labels(&self, id: Uuid, labels: Vec<String>) -> StoreResult<Job> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs SET labels = $1 WHERE user_id = $2 AND id = $3 RETURNING {JOB_COLUMNS}"
        ))
        .bind(clean_labels(labels))
        .bind(self.user_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(StoreError::JobNotFound { id })?.try_into()
    }

    async fn reconcile(
        &self,
        origin: JobOrigin,
        site: &SiteId,
        candidates: Vec<JobCandidate>,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<ReconcileOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = self
            .reconcile_in_tx(&mut tx, origin, site, candidates, seen_at)
            .await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn apply_job_details(
        &self,
        job_id: Uuid,
        details: JobCandidate,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<MergeResult> {
        let details = dedup::normalize_candidate(details);
        let mut tx = self.pool.begin().await?;
        let mut job = self.lock_job(&mut tx, job_id).await?;
        let changed = apply_merge(&mut job, &details, seen_at);
        if changed {
            self.write_job_content(&mut tx, &job).await?;
        } else {
            self.touch_job(&mut tx, job.id, seen_at).await?;
        }
        tx.commit().await?;
        Ok(MergeResult { job, changed })
    }

    // ========================================================================
    // SCAN BOOKKEEPING
    // ========================================================================

    async fn commit_link_scan(
        &self,
        link_id: Uuid,
        candidates: Vec<JobCandidate>,
        scanned_at: DateTime<Utc>,
    ) -> StoreResult<LinkScanCommit> {
        let mut tx = self.pool.begin().await?;

        let site: Option<String> =
            sqlx::query_scalar("SELECT site FROM links WHERE user_id = $1 AND id = $2 FOR UPDATE")
                .bind(self.user_id)
                .bind(link_id)
                .fetch_optional(&mut *tx)
                .await?;
        let site = SiteId::new(site.ok_or(StoreError::LinkNotFound { id: link_id })?);

        let outcome = self
            .reconcile_in_tx(&mut tx, JobOrigin::Link(link_id), &site, candidates, scanned_at)
            .await?;

        let row: LinkRow = sqlx::query_as(&format!(
            r#"
            UPDATE links
            SET scan_error_count = 0,
                last_error = NULL,
                last_scanned_at = $1
            WHERE user_id = $2 AND id = $3
            RETURNING {LINK_COLUMNS}
            "#
        ))
        .bind(scanned_at)
        .bind(self.user_id)
        .bind(link_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(LinkScanCommit {
            outcome,
            link: row.try_into()?,
        })
    }

    async fn record_link_failure(
        &self,
        link_id: Uuid,
        error: &str,
        failed_at: DateTime<Utc>,
    ) -> StoreResult<Link> {
        let row: Option<LinkRow> = sqlx::query_as(&format!(
            r#"
            UPDATE links
            SET scan_error_count = scan_error_count + 1,
                last_error = $1,
                last_scanned_at = $2
            WHERE user_id = $3 AND id = $4
            RETURNING {LINK_COLUMNS}
            "#
        ))
        .bind(error)
        .bind(failed_at)
        .bind(self.user_id)
        .bind(link_id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(StoreError::LinkNotFound { id: link_id })?.try_into()
    }

    // ========================================================================
    // SETTINGS
    // ========================================================================

    async fn load_settings(&self) -> StoreResult<Option<ScanSettings>> {
        let row: Option<SettingsRow> = sqlx::query_as(
            "SELECT cron_expression, max_concurrency, enabled FROM scan_settings WHERE user_id = $1",
        )
        .bind(self.user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ScanSettings {
            cron_expression: r.cron_expression,
            max_concurrency: r.max_concurrency.max(1) as usize,
            enabled: r.enabled,
        }))
    }

    async fn save_settings(&self, settings: &ScanSettings) -> StoreResult<()> {
        let max_concurrency = i32::try_from(settings.max_concurrency).map_err(|_| {
            StoreError::Corrupt(format!(
                "maxConcurrency {} does not fit the settings table",
                settings.max_concurrency
            ))
        })?;
        sqlx::query(
            r#"
            INSERT INTO scan_settings (user_id, cron_expression, max_concurrency, enabled, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                cron_expression = EXCLUDED.cron_expression,
                max_concurrency = EXCLUDED.max_concurrency,
                enabled = EXCLUDED.enabled,
                updated_at = NOW()
            "#,
        )
        .bind(self.user_id)
        .bind(&settings.cron_expression)
        .bind(max_concurrency)
        .bind(settings.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
