//! Test doubles for pipeline runs.
//!
//! This module provides:
//! - A scripted generator with per-stage outcomes and concurrency tracking
//! - A store wrapper that fails a configurable number of writes

mod generator;
mod store;

pub use generator::{ScriptedGenerator, Step};
pub use store::FlakyStore;
