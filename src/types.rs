//! Core identifier and record types shared across the crate.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::params::JobParams;
use crate::trigger::Trigger;

/// Identifier of a job inside the scheduling engine. Caller-supplied or
/// generated at submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a metadata record, assigned by the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataId(Uuid);

impl MetadataId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MetadataId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for MetadataId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for MetadataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A job as the scheduling engine knows it. Runtime state (whether a firing
/// is in flight, whether one was deferred) is not persisted; only the durable
/// schedule is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: JobId,
    pub job_type: String,
    pub trigger: Trigger,
    pub parameters: JobParams,
    /// `None` means the trigger is exhausted and the job is about to be
    /// removed.
    pub next_fire_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Provenance record the coordinator keeps alongside each engine job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub id: MetadataId,
    pub scheduler_job_id: JobId,
    pub author_id: Uuid,
    pub author_display: String,
    pub description: Option<String>,
    /// Raw submitted parameters, kept for display and audit.
    pub parameters: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Joined read-model row: one engine job plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub id: MetadataId,
    pub scheduler_job_id: JobId,
    pub job_type: String,
    pub display_name: String,
    pub author_display: String,
    pub description: Option<String>,
    pub next_fire_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_serializes_as_bare_string() {
        let id = JobId::new("report-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"report-42\"");
        let back: JobId = serde_json::from_str("\"report-42\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn generated_job_ids_are_unique() {
        assert_ne!(JobId::generate(), JobId::generate());
    }
}
