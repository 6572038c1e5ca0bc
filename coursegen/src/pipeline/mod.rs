//! Pipeline definition and execution.
//!
//! This module provides:
//! - Pipeline definitions and their builder
//! - The stage dependency graph
//! - Retry policies with backoff and jitter
//! - The run context and concurrency limiter
//! - The job runner that drives one run to a terminal status

mod builder;
mod context;
mod dag;
mod retry;
mod runner;


pub use builder::{PipelineBuilder, PipelineDefinition};
pub use context::{ConcurrencyLimiter, LimiterPermit, RunContext, DEFAULT_CONCURRENCY_LIMIT};
pub use dag::DependencyGraph;
pub use retry::{with_retry, BackoffStrategy, JitterStrategy, RetryPolicy};
pub use runner::{JobRunner, RunOutcome};
