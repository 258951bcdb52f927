//! Storage backends for engine jobs and metadata records.

pub mod base;
pub mod memory;
pub mod postgres;

pub use base::{
    BackendError, BackendResult, CreateMetadataParams, JobStore, MetadataStore,
};
pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;
