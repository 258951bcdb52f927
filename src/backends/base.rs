//! Backend traits and shared error type.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{JobId, JobMetadata, MetadataId, ScheduledJob};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Durable store for the engine's own job state. The engine rebuilds its
/// in-memory table from `list_jobs` on start.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace the job keyed by its id.
    async fn upsert_job(&self, job: &ScheduledJob) -> BackendResult<()>;

    async fn get_job(&self, id: &JobId) -> BackendResult<Option<ScheduledJob>>;

    /// Returns whether a job was actually removed.
    async fn delete_job(&self, id: &JobId) -> BackendResult<bool>;

    /// All jobs in insertion order.
    async fn list_jobs(&self) -> BackendResult<Vec<ScheduledJob>>;
}

/// Fields the caller provides when creating a metadata record. The store
/// assigns the id and creation timestamp.
#[derive(Debug, Clone)]
pub struct CreateMetadataParams {
    pub scheduler_job_id: JobId,
    pub author_id: Uuid,
    pub author_display: String,
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

/// Store for job provenance records, kept separate from [`JobStore`] so the
/// two can live in different databases.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_metadata(&self, params: &CreateMetadataParams)
        -> BackendResult<JobMetadata>;

    async fn get_metadata(&self, id: MetadataId) -> BackendResult<Option<JobMetadata>>;

    /// Returns whether a record was actually removed.
    async fn delete_metadata(&self, id: MetadataId) -> BackendResult<bool>;

    /// All records whose `scheduler_job_id` is in `job_ids`, for bulk joins.
    async fn get_metadata_by_job_ids(
        &self,
        job_ids: &[JobId],
    ) -> BackendResult<Vec<JobMetadata>>;

    async fn list_metadata(&self) -> BackendResult<Vec<JobMetadata>>;
}
