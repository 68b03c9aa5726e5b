//! Harvest job/object repository for PostgreSQL.

use chrono::{DateTime, Utc};
use dkan_harvest_core::error::AppError;
use dkan_harvest_core::models::{
    ErrorStage, HarvestJob, HarvestObject, HarvestSource, JobStatus, ObjectState, PreviousJob,
};
use dkan_harvest_core::traits::HarvestStore;
use sqlx::migrate::Migrator;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

/// Embedded schema migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Repository for harvest jobs, objects and their errors.
///
/// # Examples
///
/// ```no_run
/// use sqlx::postgres::PgPoolOptions;
/// use dkan_harvest_db::HarvestRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPoolOptions::new()
///     .max_connections(5)
///     .connect("postgresql://localhost/dkan_harvest")
///     .await?;
///
/// let repo = HarvestRepository::new(pool);
/// repo.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HarvestRepository {
    pool: Pool<Postgres>,
}

/// Per-job counters read back from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    pub gathered: i64,
    pub imported: i64,
    pub failed: i64,
    pub gather_errors: i64,
    pub object_errors: i64,
}

impl JobReport {
    pub fn total_objects(&self) -> i64 {
        self.gathered + self.imported + self.failed
    }

    pub fn is_error_free(&self) -> bool {
        self.gather_errors == 0 && self.object_errors == 0
    }
}

impl HarvestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending schema migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.into()))
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    pub async fn create_job(&self, job: &HarvestJob) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO harvest_jobs (id, source_id, status, gather_started, gather_finished)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(job.id)
        .bind(&job.source.id)
        .bind(job.status.as_str())
        .bind(job.gather_started)
        .bind(job.gather_finished)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE harvest_jobs
            SET status = $2,
                finished = CASE WHEN $2 = 'finished' THEN NOW() ELSE finished END
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records the end of the gather stage.
    pub async fn finish_gather(&self, job_id: Uuid) -> Result<DateTime<Utc>, AppError> {
        let (finished,): (DateTime<Utc>,) = sqlx::query_as(
            r#"
            UPDATE harvest_jobs
            SET gather_finished = NOW()
            WHERE id = $1
            RETURNING gather_finished
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(finished)
    }

    /// Most recent job of `source`, rebuilt with the given source.
    pub async fn latest_job(&self, source: &HarvestSource) -> Result<Option<HarvestJob>, AppError> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            SELECT id, status, gather_started, gather_finished
            FROM harvest_jobs
            WHERE source_id = $1
            ORDER BY gather_started DESC
            LIMIT 1
            "#,
        )
        .bind(&source.id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row.into_job(source.clone())).transpose()
    }

    pub async fn job_report(&self, job_id: Uuid) -> Result<JobReport, AppError> {
        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE o.state = 'gathered'),
                COUNT(*) FILTER (WHERE o.state = 'imported'),
                COUNT(*) FILTER (WHERE o.state = 'failed'),
                (SELECT COUNT(*) FROM harvest_gather_errors WHERE job_id = $1),
                (SELECT COUNT(*) FROM harvest_object_errors e
                   JOIN harvest_objects eo ON eo.id = e.object_id
                  WHERE eo.job_id = $1)
            FROM harvest_objects o
            WHERE o.job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(JobReport {
            gathered: row.0,
            imported: row.1,
            failed: row.2,
            gather_errors: row.3,
            object_errors: row.4,
        })
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Objects of `job_id`, optionally restricted to one state, oldest first.
    pub async fn objects_for_job(
        &self,
        job_id: Uuid,
        state: Option<ObjectState>,
    ) -> Result<Vec<HarvestObject>, AppError> {
        let rows: Vec<ObjectRow> = sqlx::query_as(
            r#"
            SELECT id, guid, job_id, content, gathered_at
            FROM harvest_objects
            WHERE job_id = $1 AND ($2::TEXT IS NULL OR state = $2)
            ORDER BY gathered_at ASC, guid ASC
            "#,
        )
        .bind(job_id)
        .bind(state.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn object_state(&self, object_id: Uuid) -> Result<Option<ObjectState>, AppError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state FROM harvest_objects WHERE id = $1")
                .bind(object_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(state,)| state.parse()).transpose()
    }

    pub async fn gather_errors(&self, job_id: Uuid) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT message FROM harvest_gather_errors WHERE job_id = $1 ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(m,)| m).collect())
    }

    async fn set_object_state(
        &self,
        object_id: Uuid,
        state: ObjectState,
        package_id: Option<&str>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE harvest_objects
            SET state = $2,
                package_id = COALESCE($3, package_id),
                imported_at = CASE WHEN $2 = 'imported' THEN NOW() ELSE imported_at END
            WHERE id = $1
            "#,
        )
        .bind(object_id)
        .bind(state.as_str())
        .bind(package_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("harvest object {}", object_id)));
        }
        Ok(())
    }
}

// =============================================================================
// Helper Types for Database Mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    status: String,
    gather_started: DateTime<Utc>,
    gather_finished: Option<DateTime<Utc>>,
}

impl JobRow {
    fn into_job(self, source: HarvestSource) -> Result<HarvestJob, AppError> {
        Ok(HarvestJob {
            id: self.id,
            source,
            status: self.status.parse()?,
            gather_started: self.gather_started,
            gather_finished: self.gather_finished,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ObjectRow {
    id: Uuid,
    guid: String,
    job_id: Uuid,
    content: Option<String>,
    gathered_at: DateTime<Utc>,
}

impl From<ObjectRow> for HarvestObject {
    fn from(row: ObjectRow) -> Self {
        Self {
            id: row.id,
            guid: row.guid,
            job_id: row.job_id,
            content: row.content,
            gathered_at: row.gathered_at,
        }
    }
}

// =============================================================================
// HarvestStore Trait Implementation
// =============================================================================

impl HarvestStore for HarvestRepository {
    async fn create_object(&self, object: &HarvestObject) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO harvest_objects (id, guid, job_id, content, state, gathered_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(object.id)
        .bind(&object.guid)
        .bind(object.job_id)
        .bind(&object.content)
        .bind(ObjectState::Gathered.as_str())
        .bind(object.gathered_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn last_error_free_job(
        &self,
        source_id: &str,
        current_job: Uuid,
    ) -> Result<Option<PreviousJob>, AppError> {
        let row: Option<(Uuid, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT j.id, j.gather_started
            FROM harvest_jobs j
            WHERE j.source_id = $1
              AND j.id <> $2
              AND j.status = 'finished'
              AND NOT EXISTS (
                  SELECT 1 FROM harvest_gather_errors ge WHERE ge.job_id = j.id
              )
              AND NOT EXISTS (
                  SELECT 1
                  FROM harvest_object_errors oe
                  JOIN harvest_objects o ON o.id = oe.object_id
                  WHERE o.job_id = j.id
              )
            ORDER BY j.gather_started DESC
            LIMIT 1
            "#,
        )
        .bind(source_id)
        .bind(current_job)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, gather_started)| PreviousJob { id, gather_started }))
    }

    async fn save_gather_error(&self, job_id: Uuid, message: &str) -> Result<(), AppError> {
        sqlx::query("INSERT INTO harvest_gather_errors (job_id, message) VALUES ($1, $2)")
            .bind(job_id)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_object_error(
        &self,
        object_id: Uuid,
        message: &str,
        stage: ErrorStage,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO harvest_object_errors (object_id, message, stage) VALUES ($1, $2, $3)",
        )
        .bind(object_id)
        .bind(message)
        .bind(stage.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_object_imported(&self, object_id: Uuid, package_id: &str) -> Result<(), AppError> {
        self.set_object_state(object_id, ObjectState::Imported, Some(package_id))
            .await
    }

    async fn mark_object_failed(&self, object_id: Uuid) -> Result<(), AppError> {
        self.set_object_state(object_id, ObjectState::Failed, None)
            .await
    }
}
