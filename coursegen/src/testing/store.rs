//! Store wrapper with injected failures.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

use crate::assembly::AssembledRecord;
use crate::core::PipelineRun;
use crate::errors::PersistenceError;
use crate::store::{InMemoryPipelineStore, PipelineStore};

type RunPredicate = Box<dyn Fn(&PipelineRun) -> bool + Send + Sync>;

/// Wraps an [`InMemoryPipelineStore`] and fails selected writes with
/// [`PersistenceError::Unavailable`].
pub struct FlakyStore {
    inner: InMemoryPipelineStore,
    run_failures: AtomicU32,
    record_failures: AtomicU32,
    predicate: RunPredicate,
}

impl FlakyStore {
    /// Creates a store that never fails.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: InMemoryPipelineStore::new(),
            run_failures: AtomicU32::new(0),
            record_failures: AtomicU32::new(0),
            predicate: Box::new(|_| true),
        }
    }

    /// Fails the next `count` run saves for which `predicate` holds.
    #[must_use]
    pub fn fail_run_saves<F>(mut self, count: u32, predicate: F) -> Self
    where
        F: Fn(&PipelineRun) -> bool + Send + Sync + 'static,
    {
        self.run_failures = AtomicU32::new(count);
        self.predicate = Box::new(predicate);
        self
    }

    /// Fails the next `count` record saves.
    #[must_use]
    pub fn fail_record_saves(self, count: u32) -> Self {
        self.record_failures.store(count, Ordering::SeqCst);
        self
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &InMemoryPipelineStore {
        &self.inner
    }

    /// Run saves still set to fail.
    #[must_use]
    pub fn pending_run_failures(&self) -> u32 {
        self.run_failures.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for FlakyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FlakyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyStore")
            .field("run_failures", &self.run_failures.load(Ordering::SeqCst))
            .field("record_failures", &self.record_failures.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PipelineStore for FlakyStore {
    async fn save_run(&self, run: &PipelineRun) -> Result<(), PersistenceError> {
        if (self.predicate)(run) && Self::take_failure(&self.run_failures) {
            return Err(PersistenceError::Unavailable("injected run save failure".to_string()));
        }
        self.inner.save_run(run).await
    }

    async fn save_assembled_record(&self, record: &AssembledRecord) -> Result<(), PersistenceError> {
        if Self::take_failure(&self.record_failures) {
            return Err(PersistenceError::Unavailable("injected record save failure".to_string()));
        }
        self.inner.save_assembled_record(record).await
    }

    async fn load_run(&self, run_id: Uuid) -> Result<PipelineRun, PersistenceError> {
        self.inner.load_run(run_id).await
    }

    async fn load_assembled_record(&self, run_id: Uuid) -> Result<AssembledRecord, PersistenceError> {
        self.inner.load_assembled_record(run_id).await
    }
}
