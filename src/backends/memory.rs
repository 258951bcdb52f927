//! In-memory backend for tests and embedded use.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::backends::base::{
    BackendResult, CreateMetadataParams, JobStore, MetadataStore,
};
use crate::types::{JobId, JobMetadata, MetadataId, ScheduledJob};

/// Vec-backed implementation of both store traits. Insertion order is the
/// listing order, matching the Postgres backend's `position` column.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    jobs: Arc<Mutex<Vec<ScheduledJob>>>,
    metadata: Arc<Mutex<Vec<JobMetadata>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryBackend {
    async fn upsert_job(&self, job: &ScheduledJob) -> BackendResult<()> {
        let mut jobs = self.jobs.lock().expect("jobs lock poisoned");
        match jobs.iter_mut().find(|existing| existing.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => jobs.push(job.clone()),
        }
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> BackendResult<Option<ScheduledJob>> {
        let jobs = self.jobs.lock().expect("jobs lock poisoned");
        Ok(jobs.iter().find(|job| job.id == *id).cloned())
    }

    async fn delete_job(&self, id: &JobId) -> BackendResult<bool> {
        let mut jobs = self.jobs.lock().expect("jobs lock poisoned");
        let before = jobs.len();
        jobs.retain(|job| job.id != *id);
        Ok(jobs.len() < before)
    }

    async fn list_jobs(&self) -> BackendResult<Vec<ScheduledJob>> {
        let jobs = self.jobs.lock().expect("jobs lock poisoned");
        Ok(jobs.clone())
    }
}

#[async_trait]
impl MetadataStore for MemoryBackend {
    async fn create_metadata(
        &self,
        params: &CreateMetadataParams,
    ) -> BackendResult<JobMetadata> {
        let record = JobMetadata {
            id: MetadataId::new(),
            scheduler_job_id: params.scheduler_job_id.clone(),
            author_id: params.author_id,
            author_display: params.author_display.clone(),
            description: params.description.clone(),
            parameters: params.parameters.clone(),
            created_at: Utc::now(),
        };
        let mut metadata = self.metadata.lock().expect("metadata lock poisoned");
        metadata.push(record.clone());
        Ok(record)
    }

    async fn get_metadata(&self, id: MetadataId) -> BackendResult<Option<JobMetadata>> {
        let metadata = self.metadata.lock().expect("metadata lock poisoned");
        Ok(metadata.iter().find(|record| record.id == id).cloned())
    }

    async fn delete_metadata(&self, id: MetadataId) -> BackendResult<bool> {
        let mut metadata = self.metadata.lock().expect("metadata lock poisoned");
        let before = metadata.len();
        metadata.retain(|record| record.id != id);
        Ok(metadata.len() < before)
    }

    async fn get_metadata_by_job_ids(
        &self,
        job_ids: &[JobId],
    ) -> BackendResult<Vec<JobMetadata>> {
        let metadata = self.metadata.lock().expect("metadata lock poisoned");
        Ok(metadata
            .iter()
            .filter(|record| job_ids.contains(&record.scheduler_job_id))
            .cloned()
            .collect())
    }

    async fn list_metadata(&self) -> BackendResult<Vec<JobMetadata>> {
        let metadata = self.metadata.lock().expect("metadata lock poisoned");
        Ok(metadata.clone())
    }
}
