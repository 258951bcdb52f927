//! Two-store consistency coordinator.
//!
//! Job submissions touch two stores that cannot share a transaction: the
//! engine's job store and the metadata store. The coordinator orders the
//! writes (engine first, then metadata), compensates the engine side when the
//! metadata write fails, tolerates half-present state on removal, and
//! reports whatever anomalies survive anyway.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backends::{CreateMetadataParams, MetadataStore};
use crate::engine::{AddJobParams, SchedulingEngine};
use crate::error::{SchedulerError, SchedulerResult};
use crate::trigger::Trigger;
use crate::types::{JobId, JobMetadata, JobView, MetadataId};

/// One user-facing job submission: the schedule plus its provenance.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub job_type: String,
    pub trigger: Trigger,
    pub parameters: serde_json::Map<String, Value>,
    pub author_id: Uuid,
    pub author_display: String,
    pub description: Option<String>,
}

/// Orphans found by a [`JobCoordinator::reconcile`] sweep.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Engine jobs with no metadata record.
    pub engine_orphans: Vec<JobId>,
    /// Metadata records whose engine job is gone.
    pub metadata_orphans: Vec<MetadataId>,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.engine_orphans.is_empty() && self.metadata_orphans.is_empty()
    }
}

#[derive(Clone)]
pub struct JobCoordinator {
    engine: SchedulingEngine,
    metadata: Arc<dyn MetadataStore>,
}

impl JobCoordinator {
    pub fn new(engine: SchedulingEngine, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { engine, metadata }
    }

    pub fn engine(&self) -> &SchedulingEngine {
        &self.engine
    }

    /// Create the engine job, then its metadata record. If the metadata
    /// write fails the engine job is deleted again so no schedule runs
    /// without provenance.
    pub async fn submit(&self, submission: JobSubmission) -> SchedulerResult<JobView> {
        let raw_parameters = Value::Object(submission.parameters.clone());
        let job = self
            .engine
            .add_job(
                AddJobParams::new(submission.job_type, submission.trigger)
                    .with_parameters(submission.parameters),
            )
            .await?;

        let metadata = match self
            .metadata
            .create_metadata(&CreateMetadataParams {
                scheduler_job_id: job.id.clone(),
                author_id: submission.author_id,
                author_display: submission.author_display,
                description: submission.description,
                parameters: raw_parameters,
            })
            .await
        {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "metadata write failed, compensating engine job");
                if let Err(compensation_err) = self.engine.delete_job(&job.id).await {
                    error!(
                        job_id = %job.id,
                        error = %compensation_err,
                        "compensating delete failed, engine job orphaned until reconciliation"
                    );
                    return Err(SchedulerError::ConsistencyAnomaly(format!(
                        "engine job {} orphaned: metadata write failed ({err}) and compensating delete failed ({compensation_err})",
                        job.id
                    )));
                }
                return Err(SchedulerError::MetadataPersistenceFailed(err.to_string()));
            }
        };

        info!(job_id = %job.id, metadata_id = %metadata.id, "job submitted");
        Ok(JobView {
            id: metadata.id,
            scheduler_job_id: job.id.clone(),
            display_name: self.display_name(&job.job_type),
            job_type: job.job_type,
            author_display: metadata.author_display,
            description: metadata.description,
            next_fire_time: job.next_fire_time,
        })
    }

    /// Remove a job by its metadata id. Tolerant of half-present state: a
    /// missing engine job is not an error, so a record orphaned by a failed
    /// compensation can still be cleaned up.
    pub async fn remove(&self, id: MetadataId) -> SchedulerResult<()> {
        let metadata = self
            .metadata
            .get_metadata(id)
            .await?
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;

        self.metadata.delete_metadata(id).await?;
        self.engine.delete_job(&metadata.scheduler_job_id).await?;
        info!(metadata_id = %id, job_id = %metadata.scheduler_job_id, "job removed");
        Ok(())
    }

    /// Joined read model: every engine job with its metadata. Engine jobs
    /// missing a metadata record are anomalies and are excluded rather than
    /// shown half-formed.
    pub async fn list_views(&self) -> SchedulerResult<Vec<JobView>> {
        let jobs = self.engine.list_jobs();
        let job_ids: Vec<JobId> = jobs.iter().map(|job| job.id.clone()).collect();
        let metadata = self.metadata.get_metadata_by_job_ids(&job_ids).await?;
        let by_job_id: HashMap<&JobId, &JobMetadata> = metadata
            .iter()
            .map(|record| (&record.scheduler_job_id, record))
            .collect();

        let mut views = Vec::with_capacity(jobs.len());
        for job in jobs {
            let Some(record) = by_job_id.get(&job.id).copied() else {
                warn!(job_id = %job.id, "engine job has no metadata record, excluded from listing");
                continue;
            };
            views.push(JobView {
                id: record.id,
                scheduler_job_id: job.id,
                display_name: self.display_name(&job.job_type),
                job_type: job.job_type,
                author_display: record.author_display.clone(),
                description: record.description.clone(),
                next_fire_time: job.next_fire_time,
            });
        }
        Ok(views)
    }

    /// Sweep both stores for records the other side lost.
    pub async fn reconcile(&self) -> SchedulerResult<ReconcileReport> {
        let jobs = self.engine.list_jobs();
        let metadata = self.metadata.list_metadata().await?;

        let report = ReconcileReport {
            engine_orphans: jobs
                .iter()
                .filter(|job| {
                    metadata
                        .iter()
                        .all(|record| record.scheduler_job_id != job.id)
                })
                .map(|job| job.id.clone())
                .collect(),
            metadata_orphans: metadata
                .iter()
                .filter(|record| {
                    jobs.iter().all(|job| job.id != record.scheduler_job_id)
                })
                .map(|record| record.id)
                .collect(),
        };
        if !report.is_consistent() {
            warn!(
                engine_orphans = report.engine_orphans.len(),
                metadata_orphans = report.metadata_orphans.len(),
                "reconciliation found inconsistent records"
            );
        }
        Ok(report)
    }

    fn display_name(&self, job_type: &str) -> String {
        self.engine
            .registry()
            .lookup(job_type)
            .map(|entry| entry.display_name.clone())
            .unwrap_or_else(|_| job_type.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{
        BackendError, BackendResult, JobStore, MemoryBackend,
    };
    use crate::clock::ManualClock;
    use crate::config::SchedulerConfig;
    use crate::engine::SchedulingEngine;
    use crate::params::ParamSpec;
    use crate::registry::{handler_fn, JobRegistry};
    use crate::trigger::IntervalTrigger;
    use crate::types::{JobMetadata, ScheduledJob};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    /// Metadata store whose create can be made to fail on demand.
    struct FailingMetadataStore {
        inner: MemoryBackend,
        fail_create: AtomicBool,
    }

    #[async_trait]
    impl MetadataStore for FailingMetadataStore {
        async fn create_metadata(
            &self,
            params: &CreateMetadataParams,
        ) -> BackendResult<JobMetadata> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(BackendError::Message("injected create failure".to_string()));
            }
            self.inner.create_metadata(params).await
        }

        async fn get_metadata(&self, id: MetadataId) -> BackendResult<Option<JobMetadata>> {
            self.inner.get_metadata(id).await
        }

        async fn delete_metadata(&self, id: MetadataId) -> BackendResult<bool> {
            self.inner.delete_metadata(id).await
        }

        async fn get_metadata_by_job_ids(
            &self,
            job_ids: &[JobId],
        ) -> BackendResult<Vec<JobMetadata>> {
            self.inner.get_metadata_by_job_ids(job_ids).await
        }

        async fn list_metadata(&self) -> BackendResult<Vec<JobMetadata>> {
            self.inner.list_metadata().await
        }
    }

    /// Job store whose delete can be made to fail on demand.
    struct FailingJobStore {
        inner: MemoryBackend,
        fail_delete: AtomicBool,
    }

    #[async_trait]
    impl JobStore for FailingJobStore {
        async fn upsert_job(&self, job: &ScheduledJob) -> BackendResult<()> {
            self.inner.upsert_job(job).await
        }

        async fn get_job(&self, id: &JobId) -> BackendResult<Option<ScheduledJob>> {
            self.inner.get_job(id).await
        }

        async fn delete_job(&self, id: &JobId) -> BackendResult<bool> {
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(BackendError::Message("injected delete failure".to_string()));
            }
            self.inner.delete_job(id).await
        }

        async fn list_jobs(&self) -> BackendResult<Vec<ScheduledJob>> {
            self.inner.list_jobs().await
        }
    }

    fn mail_registry(counter: Arc<AtomicUsize>) -> Arc<JobRegistry> {
        Arc::new(
            JobRegistry::builder()
                .job(
                    "send_email",
                    "Send email",
                    vec![
                        ParamSpec::string_list("to_addrs", "Recipients"),
                        ParamSpec::string("subject", "Subject"),
                        ParamSpec::string("text", "Body"),
                    ],
                    handler_fn(move |_params| {
                        let counter = counter.clone();
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }),
                )
                .build(),
        )
    }

    struct Fixture {
        coordinator: JobCoordinator,
        jobs: MemoryBackend,
        metadata: Arc<FailingMetadataStore>,
        clock: ManualClock,
        fired: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::at(t0());
        let jobs = MemoryBackend::new();
        let metadata = Arc::new(FailingMetadataStore {
            inner: MemoryBackend::new(),
            fail_create: AtomicBool::new(false),
        });
        let fired = Arc::new(AtomicUsize::new(0));
        let config = SchedulerConfig {
            poll_interval: StdDuration::from_millis(10),
            ..SchedulerConfig::default()
        }
        .with_clock(Arc::new(clock.clone()));
        let engine = SchedulingEngine::new(
            mail_registry(fired.clone()),
            Arc::new(jobs.clone()),
            config,
        );
        Fixture {
            coordinator: JobCoordinator::new(engine, metadata.clone()),
            jobs,
            metadata,
            clock,
            fired,
        }
    }

    fn mail_submission() -> JobSubmission {
        let parameters = match serde_json::json!({
            "to_addrs": ["ops@example.com"],
            "subject": "nightly report",
            "text": "all green",
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        JobSubmission {
            job_type: "send_email".to_string(),
            trigger: Trigger::Interval(IntervalTrigger {
                hours: 1,
                ..Default::default()
            }),
            parameters,
            author_id: Uuid::new_v4(),
            author_display: "ops team".to_string(),
            description: Some("nightly status mail".to_string()),
        }
    }

    #[tokio::test]
    async fn submit_creates_both_records_and_returns_the_view() {
        let fx = fixture();
        let view = fx.coordinator.submit(mail_submission()).await.unwrap();

        assert_eq!(view.display_name, "Send email");
        assert_eq!(view.author_display, "ops team");
        assert_eq!(view.next_fire_time, Some(t0() + Duration::hours(1)));

        assert_eq!(fx.jobs.list_jobs().await.unwrap().len(), 1);
        let records = fx.metadata.list_metadata().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].scheduler_job_id, view.scheduler_job_id);
        assert_eq!(records[0].parameters["subject"], "nightly report");
    }

    #[tokio::test]
    async fn metadata_failure_compensates_the_engine_job() {
        let fx = fixture();
        fx.metadata.fail_create.store(true, Ordering::SeqCst);

        let err = fx.coordinator.submit(mail_submission()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::MetadataPersistenceFailed(_)));

        // Neither store keeps a trace of the failed submission.
        assert!(fx.jobs.list_jobs().await.unwrap().is_empty());
        assert!(fx.coordinator.engine().list_jobs().is_empty());
        assert!(fx.metadata.list_metadata().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_compensation_surfaces_a_consistency_anomaly() {
        let clock = ManualClock::at(t0());
        let jobs = Arc::new(FailingJobStore {
            inner: MemoryBackend::new(),
            fail_delete: AtomicBool::new(true),
        });
        let metadata = Arc::new(FailingMetadataStore {
            inner: MemoryBackend::new(),
            fail_create: AtomicBool::new(true),
        });
        let config = SchedulerConfig::default().with_clock(Arc::new(clock.clone()));
        let engine = SchedulingEngine::new(
            mail_registry(Arc::new(AtomicUsize::new(0))),
            jobs.clone(),
            config,
        );
        let coordinator = JobCoordinator::new(engine, metadata);

        let err = coordinator.submit(mail_submission()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ConsistencyAnomaly(_)));
        // The orphaned engine row is left for reconciliation.
        assert_eq!(jobs.inner.list_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_clears_both_stores_and_tolerates_missing_engine_job() {
        let fx = fixture();
        let view = fx.coordinator.submit(mail_submission()).await.unwrap();

        fx.coordinator.remove(view.id).await.unwrap();
        assert!(fx.jobs.list_jobs().await.unwrap().is_empty());
        assert!(fx.metadata.list_metadata().await.unwrap().is_empty());

        // Unknown id after removal.
        assert!(matches!(
            fx.coordinator.remove(view.id).await,
            Err(SchedulerError::JobNotFound(_))
        ));

        // Orphaned metadata (engine job already gone) can still be removed.
        let orphan = fx.coordinator.submit(mail_submission()).await.unwrap();
        fx.coordinator
            .engine()
            .delete_job(&orphan.scheduler_job_id)
            .await
            .unwrap();
        fx.coordinator.remove(orphan.id).await.unwrap();
        assert!(fx.metadata.list_metadata().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_views_joins_and_excludes_anomalies() {
        let fx = fixture();
        let view = fx.coordinator.submit(mail_submission()).await.unwrap();

        // An engine job without metadata must not surface half-formed.
        let mut rogue = mail_submission();
        rogue.description = None;
        let rogue_view = fx.coordinator.submit(rogue).await.unwrap();
        fx.metadata.delete_metadata(rogue_view.id).await.unwrap();

        let views = fx.coordinator.list_views().await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].id, view.id);
        assert_eq!(views[0].display_name, "Send email");
    }

    #[tokio::test]
    async fn reconcile_reports_orphans_on_both_sides() {
        let fx = fixture();
        let view = fx.coordinator.submit(mail_submission()).await.unwrap();
        let report = fx.coordinator.reconcile().await.unwrap();
        assert!(report.is_consistent());

        // Metadata orphan: engine job vanished.
        fx.coordinator
            .engine()
            .delete_job(&view.scheduler_job_id)
            .await
            .unwrap();
        // Engine orphan: metadata vanished.
        let other = fx.coordinator.submit(mail_submission()).await.unwrap();
        fx.metadata.delete_metadata(other.id).await.unwrap();

        let report = fx.coordinator.reconcile().await.unwrap();
        assert_eq!(report.metadata_orphans, vec![view.id]);
        assert_eq!(report.engine_orphans, vec![other.scheduler_job_id]);
    }

    #[tokio::test]
    async fn submitted_job_fires_end_to_end() {
        let fx = fixture();
        fx.coordinator.submit(mail_submission()).await.unwrap();
        fx.coordinator.engine().start().await.unwrap();

        fx.clock.advance(Duration::hours(1));
        for _ in 0..200 {
            if fx.fired.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        assert_eq!(fx.fired.load(Ordering::SeqCst), 1);

        fx.coordinator.engine().stop().await.unwrap();
    }
}
