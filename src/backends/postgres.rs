//! Postgres backend.
//!
//! Both store traits are implemented against the same pool; deployments that
//! split the tables across databases construct two backends with different
//! pools.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::backends::base::{
    BackendResult, CreateMetadataParams, JobStore, MetadataStore,
};
use crate::types::{JobId, JobMetadata, MetadataId, ScheduledJob};

#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run pending migrations.
    pub async fn connect(dsn: &str) -> BackendResult<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(dsn).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct JobRow {
    id: String,
    job_type: String,
    trigger: serde_json::Value,
    parameters: serde_json::Value,
    next_fire_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self) -> BackendResult<ScheduledJob> {
        Ok(ScheduledJob {
            id: JobId::new(self.id),
            job_type: self.job_type,
            trigger: serde_json::from_value(self.trigger)?,
            parameters: serde_json::from_value(self.parameters)?,
            next_fire_time: self.next_fire_time,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl JobStore for PostgresBackend {
    async fn upsert_job(&self, job: &ScheduledJob) -> BackendResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_jobs (id, job_type, trigger, parameters, next_fire_time, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                job_type = EXCLUDED.job_type,
                trigger = EXCLUDED.trigger,
                parameters = EXCLUDED.parameters,
                next_fire_time = EXCLUDED.next_fire_time,
                updated_at = NOW()
            "#,
        )
        .bind(job.id.as_str())
        .bind(&job.job_type)
        .bind(serde_json::to_value(&job.trigger)?)
        .bind(serde_json::to_value(&job.parameters)?)
        .bind(job.next_fire_time)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> BackendResult<Option<ScheduledJob>> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT id, job_type, trigger, parameters, next_fire_time, created_at
             FROM scheduled_jobs WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobRow::into_job).transpose()
    }

    async fn delete_job(&self, id: &JobId) -> BackendResult<bool> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_jobs(&self) -> BackendResult<Vec<ScheduledJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT id, job_type, trigger, parameters, next_fire_time, created_at
             FROM scheduled_jobs ORDER BY position",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }
}

#[derive(FromRow)]
struct MetadataRow {
    id: Uuid,
    scheduler_job_id: String,
    author_id: Uuid,
    author_display: String,
    description: Option<String>,
    parameters: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<MetadataRow> for JobMetadata {
    fn from(row: MetadataRow) -> Self {
        Self {
            id: MetadataId::from(row.id),
            scheduler_job_id: JobId::new(row.scheduler_job_id),
            author_id: row.author_id,
            author_display: row.author_display,
            description: row.description,
            parameters: row.parameters,
            created_at: row.created_at,
        }
    }
}

const METADATA_COLUMNS: &str =
    "id, scheduler_job_id, author_id, author_display, description, parameters, created_at";

#[async_trait]
impl MetadataStore for PostgresBackend {
    async fn create_metadata(
        &self,
        params: &CreateMetadataParams,
    ) -> BackendResult<JobMetadata> {
        let row = sqlx::query_as::<_, MetadataRow>(&format!(
            "INSERT INTO job_metadata (scheduler_job_id, author_id, author_display, description, parameters)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {METADATA_COLUMNS}",
        ))
        .bind(params.scheduler_job_id.as_str())
        .bind(params.author_id)
        .bind(&params.author_display)
        .bind(&params.description)
        .bind(&params.parameters)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_metadata(&self, id: MetadataId) -> BackendResult<Option<JobMetadata>> {
        let row = sqlx::query_as::<_, MetadataRow>(&format!(
            "SELECT {METADATA_COLUMNS} FROM job_metadata WHERE id = $1",
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn delete_metadata(&self, id: MetadataId) -> BackendResult<bool> {
        let result = sqlx::query("DELETE FROM job_metadata WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_metadata_by_job_ids(
        &self,
        job_ids: &[JobId],
    ) -> BackendResult<Vec<JobMetadata>> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = job_ids.iter().map(|id| id.as_str().to_string()).collect();
        let rows = sqlx::query_as::<_, MetadataRow>(&format!(
            "SELECT {METADATA_COLUMNS} FROM job_metadata
             WHERE scheduler_job_id = ANY($1) ORDER BY created_at",
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_metadata(&self) -> BackendResult<Vec<JobMetadata>> {
        let rows = sqlx::query_as::<_, MetadataRow>(&format!(
            "SELECT {METADATA_COLUMNS} FROM job_metadata ORDER BY created_at",
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
