//! # Coursegen
//!
//! A dependency-driven pipeline engine for generating structured courses.
//!
//! A course is produced by a DAG of generation stages: an outline, then per
//! chapter the lessons, the concepts behind them and exercises practising
//! them. Each stage asks a [`Generator`](stages::Generator) for structured
//! output, validates it against the stage's schema and hands it to the
//! stages that depend on it.
//!
//! - **Definitions**: stages with dependencies, validated once at build time
//! - **Bounded execution**: one coordinating loop per run, with stage attempts
//!   limited by a limiter shared across runs
//! - **Retries**: per-stage attempt budgets with exponential backoff and jitter
//! - **Durability**: every state change is checkpointed to a
//!   [`PipelineStore`](store::PipelineStore), and interrupted runs resume
//! - **Assembly**: a completed run is merged into one fingerprinted course
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use coursegen::prelude::*;
//!
//! let service = PipelineService::new(generator, Arc::new(InMemoryPipelineStore::new()));
//! service.register(CourseBlueprint::new(3).definition("course")?);
//!
//! let run_id = service.submit("course", json!({ "topic": "Rust ownership" })).await?;
//! let report = service.wait(run_id).await?;
//! let record = service.record(run_id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod assembly;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod course;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod schema;
pub mod service;
pub mod stages;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::assembly::{assemble, AssembledRecord, Course};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{EngineConfig, LogConfig};
    pub use crate::core::{PipelineRun, RunStatus, StageExecution, StageStatus};
    pub use crate::course::CourseBlueprint;
    pub use crate::errors::{
        AssemblyError, CoursegenError, DefinitionError, GenerationError, PersistenceError,
        SchemaMismatch, ServiceError, StageError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::init_tracing;
    pub use crate::pipeline::{
        ConcurrencyLimiter, JobRunner, PipelineBuilder, PipelineDefinition, RetryPolicy,
        RunContext,
    };
    pub use crate::schema::{FieldSchema, SchemaDescriptor};
    pub use crate::service::{PipelineService, RunStatusReport};
    pub use crate::stages::{Generator, HierarchySlot, PromptMaterial, StageDefinition};
    pub use crate::store::{InMemoryPipelineStore, JsonFileStore, PipelineStore};
}
