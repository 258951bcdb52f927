//! Scheduling engine: job table, firing loop, and lifecycle.
//!
//! The engine keeps its job table in memory behind a `Mutex` and mirrors
//! every mutation to a [`JobStore`] so a restart can rebuild the table. The
//! firing loop polls the table, spawns due handlers onto a bounded worker
//! pool, and enforces per-job exclusivity: at most one invocation of a given
//! job runs at a time, and an occurrence that comes due mid-run is deferred
//! to fire right after the current run finishes rather than dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::backends::JobStore;
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::params::validate_params;
use crate::registry::JobRegistry;
use crate::trigger::Trigger;
use crate::types::{JobId, ScheduledJob};

/// Submission of one job to the engine.
#[derive(Debug, Clone)]
pub struct AddJobParams {
    pub job_type: String,
    pub trigger: Trigger,
    pub parameters: serde_json::Map<String, Value>,
    /// Caller-chosen id. Generated when absent.
    pub job_id: Option<JobId>,
    /// Replace an existing job with the same id instead of failing.
    pub replace_existing: bool,
}

impl AddJobParams {
    pub fn new(job_type: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            job_type: job_type.into(),
            trigger,
            parameters: serde_json::Map::new(),
            job_id: None,
            replace_existing: false,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn replace_existing(mut self) -> Self {
        self.replace_existing = true;
        self
    }
}

struct JobEntry {
    job: ScheduledJob,
    /// Insertion order, stable across replacement.
    seq: u64,
    /// Bumped on every insert. A firing carries the generation it was
    /// dispatched under so a completion cannot touch the schedule of a job
    /// that was replaced while the handler ran.
    generation: u64,
    /// Generation of the handler invocation currently in flight, if any.
    /// Preserved across replacement so the new job cannot fire concurrently
    /// with the old invocation under the same id.
    running_fire: Option<u64>,
    /// An occurrence came due while a run was in flight; fire again right
    /// after.
    deferred: bool,
}

#[derive(Default)]
struct JobTable {
    entries: HashMap<JobId, JobEntry>,
    next_seq: u64,
    next_generation: u64,
}

impl JobTable {
    fn insert(&mut self, job: ScheduledJob) {
        let (seq, running_fire) = match self.entries.get(&job.id) {
            Some(existing) => (existing.seq, existing.running_fire),
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                (seq, None)
            }
        };
        let generation = self.next_generation;
        self.next_generation += 1;
        self.entries.insert(
            job.id.clone(),
            JobEntry {
                job,
                seq,
                generation,
                running_fire,
                deferred: false,
            },
        );
    }
}

struct EngineRuntime {
    shutdown_tx: watch::Sender<bool>,
    loop_handle: JoinHandle<()>,
}

/// One due occurrence handed to a worker.
struct Firing {
    job: ScheduledJob,
    fire_time: DateTime<Utc>,
    /// Entry generation at dispatch; stale completions are detected by
    /// comparing against the table.
    generation: u64,
}

#[derive(Clone)]
pub struct SchedulingEngine {
    registry: Arc<JobRegistry>,
    store: Arc<dyn JobStore>,
    config: SchedulerConfig,
    jobs: Arc<Mutex<JobTable>>,
    workers: Arc<Semaphore>,
    runtime: Arc<tokio::sync::Mutex<Option<EngineRuntime>>>,
}

impl SchedulingEngine {
    pub fn new(
        registry: Arc<JobRegistry>,
        store: Arc<dyn JobStore>,
        config: SchedulerConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_count));
        Self {
            registry,
            store,
            config,
            jobs: Arc::new(Mutex::new(JobTable::default())),
            workers,
            runtime: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Validate and add a job. The job is persisted before this returns; the
    /// in-memory insert is rolled back if persistence fails.
    pub async fn add_job(&self, params: AddJobParams) -> SchedulerResult<ScheduledJob> {
        let entry = self.registry.lookup(&params.job_type)?;
        params.trigger.validate()?;
        let validated = validate_params(&entry.parameters, &params.parameters)?;

        let now = self.config.clock.now();
        let next_fire_time = params
            .trigger
            .next_fire(now, None)
            .ok_or_else(|| {
                SchedulerError::InvalidTrigger("trigger will never fire".to_string())
            })?;

        let job = ScheduledJob {
            id: params.job_id.unwrap_or_else(JobId::generate),
            job_type: params.job_type,
            trigger: params.trigger,
            parameters: validated,
            next_fire_time: Some(next_fire_time),
            created_at: now,
        };

        let replaced = {
            let mut table = self.jobs.lock().expect("job table poisoned");
            let previous = match table.entries.get(&job.id) {
                Some(_) if !params.replace_existing => {
                    return Err(SchedulerError::DuplicateJob(job.id.clone()));
                }
                Some(existing) => Some((existing.job.clone(), existing.generation)),
                None => None,
            };
            table.insert(job.clone());
            previous
        };

        if let Err(err) = self.store.upsert_job(&job).await {
            let mut table = self.jobs.lock().expect("job table poisoned");
            match replaced {
                Some((previous, generation)) => {
                    table.insert(previous);
                    if let Some(entry) = table.entries.get_mut(&job.id) {
                        entry.generation = generation;
                    }
                }
                None => {
                    table.entries.remove(&job.id);
                }
            }
            return Err(err.into());
        }

        info!(job_id = %job.id, job_type = %job.job_type, next_fire_time = ?job.next_fire_time, "added job");
        Ok(job)
    }

    pub fn get_job(&self, id: &JobId) -> SchedulerResult<ScheduledJob> {
        let table = self.jobs.lock().expect("job table poisoned");
        table
            .entries
            .get(id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))
    }

    /// All jobs in insertion order.
    pub fn list_jobs(&self) -> Vec<ScheduledJob> {
        let table = self.jobs.lock().expect("job table poisoned");
        let mut entries: Vec<&JobEntry> = table.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.job.clone()).collect()
    }

    /// Remove a job. Idempotent: removing an absent job succeeds. An
    /// in-flight handler invocation runs to completion but the job will not
    /// fire again.
    pub async fn delete_job(&self, id: &JobId) -> SchedulerResult<()> {
        let removed = {
            let mut table = self.jobs.lock().expect("job table poisoned");
            table.entries.remove(id).is_some()
        };
        self.store.delete_job(id).await?;
        if removed {
            info!(job_id = %id, "deleted job");
        }
        Ok(())
    }

    /// Recover persisted jobs and spawn the firing loop.
    pub async fn start(&self) -> SchedulerResult<()> {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.recover().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = self.clone();
        let loop_handle = tokio::spawn(async move {
            engine.run_loop(shutdown_rx).await;
        });
        *runtime = Some(EngineRuntime {
            shutdown_tx,
            loop_handle,
        });
        info!("scheduling engine started");
        Ok(())
    }

    /// Signal the firing loop to stop and wait for in-flight handlers to
    /// finish.
    pub async fn stop(&self) -> SchedulerResult<()> {
        let mut runtime = self.runtime.lock().await;
        let EngineRuntime {
            shutdown_tx,
            loop_handle,
        } = runtime.take().ok_or(SchedulerError::NotRunning)?;

        let _ = shutdown_tx.send(true);
        if let Err(err) = loop_handle.await {
            error!(error = %err, "firing loop task failed");
        }
        info!("scheduling engine stopped");
        Ok(())
    }

    /// Rebuild the job table from the store, applying the misfire policy to
    /// fire times that went stale while the engine was down.
    async fn recover(&self) -> SchedulerResult<()> {
        let persisted = self.store.list_jobs().await?;
        let now = self.config.clock.now();
        let grace = Duration::from_std(self.config.misfire_grace)
            .unwrap_or_else(|_| Duration::MAX);

        let mut keep = Vec::new();
        let mut drop = Vec::new();
        for mut job in persisted {
            match job.next_fire_time {
                Some(next) if next <= now && now - next > grace => {
                    // Stale beyond grace: skip the missed occurrence and move
                    // to the next one, or retire the job if there is none.
                    match job.trigger.next_fire(now, Some(next)) {
                        Some(advanced) => {
                            warn!(
                                job_id = %job.id,
                                missed = %next,
                                next_fire_time = %advanced,
                                "skipped misfired occurrence beyond grace window"
                            );
                            job.next_fire_time = Some(advanced);
                            keep.push(job);
                        }
                        None => {
                            warn!(job_id = %job.id, missed = %next, "trigger exhausted after misfire");
                            drop.push(job.id);
                        }
                    }
                }
                Some(_) => keep.push(job),
                None => drop.push(job.id),
            }
        }

        {
            let mut table = self.jobs.lock().expect("job table poisoned");
            for job in &keep {
                table.insert(job.clone());
            }
        }
        for job in &keep {
            self.store.upsert_job(job).await?;
        }
        for id in &drop {
            self.store.delete_job(id).await?;
        }
        info!(recovered = keep.len(), retired = drop.len(), "recovered persisted jobs");
        Ok(())
    }

    async fn run_loop(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut handlers: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = sleep(self.config.poll_interval) => {
                    for firing in self.collect_due() {
                        let engine = self.clone();
                        handlers.spawn(async move {
                            engine.fire_job(firing).await;
                        });
                    }
                }
                Some(result) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(err) = result {
                        error!(error = %err, "worker task failed");
                    }
                }
            }
        }
        // Graceful stop: let in-flight handlers finish.
        while let Some(result) = handlers.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "worker task failed during shutdown");
            }
        }
    }

    /// Scan the table for due jobs. Jobs already running get a deferred
    /// occurrence instead of a concurrent one.
    fn collect_due(&self) -> Vec<Firing> {
        let now = self.config.clock.now();
        let mut table = self.jobs.lock().expect("job table poisoned");
        let mut due = Vec::new();
        for entry in table.entries.values_mut() {
            let Some(next) = entry.job.next_fire_time else {
                continue;
            };
            if next > now {
                continue;
            }
            if let Some(run_generation) = entry.running_fire {
                if entry.deferred {
                    continue;
                }
                // next_fire_time does not advance until the run completes, so
                // the in-flight occurrence itself re-polls as due. Defer only
                // when a strictly later occurrence has arrived, or when the
                // due time belongs to a replacement installed mid-run.
                let new_occurrence_due = if run_generation == entry.generation {
                    entry
                        .job
                        .trigger
                        .next_fire(next, Some(next))
                        .is_some_and(|followup| followup <= now)
                } else {
                    true
                };
                if new_occurrence_due {
                    entry.deferred = true;
                    info!(job_id = %entry.job.id, "occurrence due while running, deferred");
                }
                continue;
            }
            entry.running_fire = Some(entry.generation);
            due.push(Firing {
                job: entry.job.clone(),
                fire_time: next,
                generation: entry.generation,
            });
        }
        due.sort_by_key(|firing| firing.fire_time);
        due
    }

    async fn fire_job(&self, firing: Firing) {
        // The permit is taken inside the worker task so the firing loop never
        // blocks on pool capacity.
        let permit = match self.workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let job = &firing.job;
        match self.registry.lookup(&job.job_type) {
            Ok(entry) => {
                info!(job_id = %job.id, job_type = %job.job_type, fire_time = %firing.fire_time, "firing job");
                let run = entry.handler.run(job.parameters.clone());
                match std::panic::AssertUnwindSafe(run).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        error!(job_id = %job.id, error = %err, "job handler failed");
                    }
                    Err(_) => {
                        error!(job_id = %job.id, "job handler panicked");
                    }
                }
            }
            Err(err) => {
                error!(job_id = %job.id, error = %err, "job type vanished from registry");
            }
        }
        drop(permit);

        self.complete_firing(&firing).await;
    }

    /// Clear the running flag and compute what happens next: fire the
    /// deferred occurrence, reschedule, or retire the job.
    async fn complete_firing(&self, firing: &Firing) {
        enum Outcome {
            Rescheduled(ScheduledJob),
            Exhausted(JobId),
            Untouched,
        }

        let outcome = {
            let mut table = self.jobs.lock().expect("job table poisoned");
            match table.entries.get_mut(&firing.job.id) {
                // Deleted while running.
                None => Outcome::Untouched,
                // The entry was deleted and re-added while this run was in
                // flight; its state belongs to the new lineage.
                Some(entry) if entry.running_fire != Some(firing.generation) => {
                    Outcome::Untouched
                }
                Some(entry) => {
                    entry.running_fire = None;
                    if entry.generation != firing.generation {
                        // Replaced while running: the replacement's schedule
                        // stands as written, and any occurrence that came due
                        // during the old run fires on the next poll.
                        entry.deferred = false;
                        Outcome::Untouched
                    } else if entry.deferred {
                        // Keep next_fire_time as-is: the deferred occurrence
                        // is picked up on the next poll.
                        entry.deferred = false;
                        Outcome::Untouched
                    } else {
                        let now = self.config.clock.now();
                        match entry.job.trigger.next_fire(now, Some(firing.fire_time)) {
                            Some(next) => {
                                entry.job.next_fire_time = Some(next);
                                Outcome::Rescheduled(entry.job.clone())
                            }
                            None => {
                                let id = entry.job.id.clone();
                                table.entries.remove(&id);
                                Outcome::Exhausted(id)
                            }
                        }
                    }
                }
            }
        };

        match outcome {
            Outcome::Rescheduled(job) => {
                if let Err(err) = self.store.upsert_job(&job).await {
                    error!(job_id = %job.id, error = %err, "failed to persist reschedule");
                }
            }
            Outcome::Exhausted(id) => {
                info!(job_id = %id, "trigger exhausted, job retired");
                if let Err(err) = self.store.delete_job(&id).await {
                    error!(job_id = %id, error = %err, "failed to delete retired job");
                }
            }
            Outcome::Untouched => {}
        }
    }
}
