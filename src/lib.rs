//! metronome: an embeddable job scheduling library.
//!
//! Jobs are instances of registered job types ([`JobRegistry`]), fire on
//! date or interval triggers ([`Trigger`]), and survive restarts through a
//! pluggable [`JobStore`]. The [`SchedulingEngine`] owns the firing loop and
//! misfire recovery; the [`JobCoordinator`] keeps the engine's state and an
//! external [`MetadataStore`] consistent across submissions and removals.

pub mod backends;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod params;
pub mod registry;
pub mod trigger;
pub mod types;

pub use backends::{
    BackendError, BackendResult, CreateMetadataParams, JobStore, MemoryBackend,
    MetadataStore, PostgresBackend,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{database_url, SchedulerConfig};
pub use coordinator::{JobCoordinator, JobSubmission, ReconcileReport};
pub use engine::{AddJobParams, SchedulingEngine};
pub use error::{SchedulerError, SchedulerResult};
pub use params::{validate_params, JobParams, ParamKind, ParamSpec, ParamValue};
pub use registry::{handler_fn, JobHandler, JobRegistry, JobRegistryBuilder, RegistryEntry};
pub use trigger::{IntervalTrigger, Trigger};
pub use types::{JobId, JobMetadata, JobView, MetadataId, ScheduledJob};
