//! Run lifecycle events.
//!
//! The runner reports every stage transition, run status change and store
//! retry to an [`EventSink`]. Sinks must never fail the run.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A stage changed status. Data: `run_id`, `stage`, `from`, `to`, `attempt`.
pub const STAGE_TRANSITION: &str = "stage.transition";
/// A run changed status. Data: `run_id`, `status`.
pub const RUN_STATUS: &str = "run.status";
/// A store write failed and may be retried. Data: `run_id`, `attempt`, `error`.
pub const PERSISTENCE_RETRY: &str = "persistence.retry";
/// A store write exhausted its retries. Data: `run_id`, `error`.
pub const PERSISTENCE_FAILED: &str = "persistence.failed";
/// A run was assembled into a record. Data: `run_id`, `fingerprint`.
pub const RECORD_ASSEMBLED: &str = "record.assembled";
