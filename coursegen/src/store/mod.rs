//! Durable storage of runs and assembled records.
//!
//! Every stage status and output is saved as part of the run snapshot, so a
//! restarted process can resume a run instead of starting from the seed.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::InMemoryPipelineStore;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::assembly::AssembledRecord;
use crate::core::PipelineRun;
use crate::errors::PersistenceError;
use crate::events::{self, EventSink};
use crate::pipeline::{with_retry, RetryPolicy};

/// Storage adapter for runs and assembled records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PipelineStore: Send + Sync + std::fmt::Debug {
    /// Saves a full run snapshot, replacing any previous one.
    async fn save_run(&self, run: &PipelineRun) -> Result<(), PersistenceError>;

    /// Saves an assembled record atomically: readers see either the
    /// previous record or the whole new one.
    async fn save_assembled_record(&self, record: &AssembledRecord) -> Result<(), PersistenceError>;

    /// Loads a run snapshot.
    async fn load_run(&self, run_id: Uuid) -> Result<PipelineRun, PersistenceError>;

    /// Loads the record assembled from a run.
    async fn load_assembled_record(&self, run_id: Uuid) -> Result<AssembledRecord, PersistenceError>;
}

/// Saves `run` under the persistence retry policy.
///
/// Each failed write is reported as a `persistence.retry` event.
///
/// # Errors
///
/// Returns the last error once the policy gives up or the error is permanent.
pub async fn persist_run(
    store: &dyn PipelineStore,
    policy: &RetryPolicy,
    sink: &dyn EventSink,
    run: &PipelineRun,
) -> Result<(), PersistenceError> {
    let mut attempt = 0u32;
    with_retry(policy, "save_run", PersistenceError::is_retryable, || {
        attempt += 1;
        let attempt = attempt;
        async move {
            let result = store.save_run(run).await;
            if let Err(ref error) = result {
                sink.try_emit(
                    events::PERSISTENCE_RETRY,
                    Some(json!({
                        "run_id": run.id,
                        "attempt": attempt,
                        "error": error.to_string(),
                    })),
                );
            }
            result
        }
    })
    .await
}

/// Saves `record` under the persistence retry policy.
///
/// # Errors
///
/// Returns the last error once the policy gives up or the error is permanent.
pub async fn persist_record(
    store: &dyn PipelineStore,
    policy: &RetryPolicy,
    record: &AssembledRecord,
) -> Result<(), PersistenceError> {
    with_retry(policy, "save_assembled_record", PersistenceError::is_retryable, || {
        store.save_assembled_record(record)
    })
    .await
}
