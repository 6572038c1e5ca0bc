//! Core domain model types for coursegen.
//!
//! This module contains:
//! - Run and stage status enums with the stage state machine
//! - Pipeline runs and stage executions

mod run;
mod status;

pub use run::{PipelineRun, RunFailure, StageExecution};
pub use status::{RunStatus, StageStatus};
