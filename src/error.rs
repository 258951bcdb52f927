//! Error taxonomy for scheduling, validation, and coordination failures.

use thiserror::Error;

use crate::backends::BackendError;
use crate::types::JobId;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The trigger can never produce a valid fire time.
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    /// No registry entry exists for the submitted job type.
    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    /// The parameter bag does not match the registry entry's schema.
    /// Carries every violation, not just the first.
    #[error("invalid parameters: {}", violations.join("; "))]
    InvalidParameters { violations: Vec<String> },

    #[error("job not found: {0}")]
    JobNotFound(String),

    /// An explicit job id collided and `replace_existing` was not set.
    #[error("job already exists: {0}")]
    DuplicateJob(JobId),

    #[error("scheduling engine is already running")]
    AlreadyRunning,

    #[error("scheduling engine is not running")]
    NotRunning,

    /// The metadata write after a successful engine add failed. The engine
    /// side has been compensated (or reported as an anomaly if that failed).
    #[error("metadata persistence failed: {0}")]
    MetadataPersistenceFailed(String),

    /// Engine and metadata state disagree in a way a read path detected.
    #[error("consistency anomaly: {0}")]
    ConsistencyAnomaly(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    /// All violations carried by an `InvalidParameters` error.
    pub fn violations(&self) -> &[String] {
        match self {
            Self::InvalidParameters { violations } => violations,
            _ => &[],
        }
    }
}
