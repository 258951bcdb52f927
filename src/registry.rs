//! Job type registry.
//!
//! Maps each job type name to its handler and parameter schema. The registry
//! is built once at startup and never mutated afterwards, so the engine can
//! hold it behind a plain `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{SchedulerError, SchedulerResult};
use crate::params::{JobParams, ParamSpec};

/// Executable body of a job type. Handlers receive the validated parameter
/// bag for each firing and report failures as `anyhow` errors.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, params: JobParams) -> anyhow::Result<()>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobParams) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self, params: JobParams) -> anyhow::Result<()> {
        (self.f)(params).await
    }
}

/// Wrap an async closure as a [`JobHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(JobParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// One registered job type.
#[derive(Clone)]
pub struct RegistryEntry {
    pub job_type: String,
    pub display_name: String,
    pub parameters: Vec<ParamSpec>,
    pub handler: Arc<dyn JobHandler>,
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("job_type", &self.job_type)
            .field("display_name", &self.display_name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// Immutable map of job type name to [`RegistryEntry`].
#[derive(Debug, Default)]
pub struct JobRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl JobRegistry {
    pub fn builder() -> JobRegistryBuilder {
        JobRegistryBuilder::default()
    }

    pub fn lookup(&self, job_type: &str) -> SchedulerResult<&RegistryEntry> {
        self.entries
            .get(job_type)
            .ok_or_else(|| SchedulerError::UnknownJobType(job_type.to_string()))
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }
}

#[derive(Debug, Default)]
pub struct JobRegistryBuilder {
    entries: HashMap<String, RegistryEntry>,
}

impl JobRegistryBuilder {
    pub fn register(mut self, entry: RegistryEntry) -> Self {
        self.entries.insert(entry.job_type.clone(), entry);
        self
    }

    pub fn job(
        self,
        job_type: impl Into<String>,
        display_name: impl Into<String>,
        parameters: Vec<ParamSpec>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        self.register(RegistryEntry {
            job_type: job_type.into(),
            display_name: display_name.into(),
            parameters,
            handler,
        })
    }

    pub fn build(self) -> JobRegistry {
        JobRegistry {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn JobHandler> {
        handler_fn(|_params| async { Ok(()) })
    }

    #[test]
    fn lookup_finds_registered_types() {
        let registry = JobRegistry::builder()
            .job(
                "send_email",
                "Send email",
                vec![
                    ParamSpec::string_list("to_addrs", "Recipients"),
                    ParamSpec::string("subject", "Subject"),
                    ParamSpec::string("text", "Body"),
                ],
                noop(),
            )
            .build();

        let entry = registry.lookup("send_email").unwrap();
        assert_eq!(entry.display_name, "Send email");
        assert_eq!(entry.parameters.len(), 3);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let registry = JobRegistry::builder().build();
        assert!(matches!(
            registry.lookup("nope"),
            Err(SchedulerError::UnknownJobType(name)) if name == "nope"
        ));
    }

    #[tokio::test]
    async fn handler_fn_runs_the_closure() {
        let handler = handler_fn(|params: JobParams| async move {
            anyhow::ensure!(params.is_empty(), "expected no params");
            Ok(())
        });
        handler.run(JobParams::new()).await.unwrap();
    }
}
