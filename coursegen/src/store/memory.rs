//! In-memory store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use super::PipelineStore;
use crate::assembly::AssembledRecord;
use crate::core::PipelineRun;
use crate::errors::PersistenceError;

/// Keeps runs and records in process memory. Snapshots are cloned in and out,
/// so callers never share state with the store.
#[derive(Debug, Default)]
pub struct InMemoryPipelineStore {
    runs: RwLock<HashMap<Uuid, PipelineRun>>,
    records: RwLock<HashMap<Uuid, AssembledRecord>>,
    run_saves: AtomicU64,
}

impl InMemoryPipelineStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful run saves.
    #[must_use]
    pub fn run_saves(&self) -> u64 {
        self.run_saves.load(Ordering::Relaxed)
    }

    /// Number of stored runs.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.read().len()
    }

    /// Number of stored records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }
}

#[async_trait]
impl PipelineStore for InMemoryPipelineStore {
    async fn save_run(&self, run: &PipelineRun) -> Result<(), PersistenceError> {
        self.runs.write().insert(run.id, run.clone());
        self.run_saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn save_assembled_record(&self, record: &AssembledRecord) -> Result<(), PersistenceError> {
        self.records.write().insert(record.run_id, record.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<PipelineRun, PersistenceError> {
        self.runs
            .read()
            .get(&run_id)
            .cloned()
            .ok_or(PersistenceError::RunNotFound(run_id))
    }

    async fn load_assembled_record(&self, run_id: Uuid) -> Result<AssembledRecord, PersistenceError> {
        self.records
            .read()
            .get(&run_id)
            .cloned()
            .ok_or(PersistenceError::RecordNotFound(run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunStatus;
    use crate::pipeline::PipelineBuilder;
    use crate::schema::SchemaDescriptor;
    use crate::stages::StageDefinition;

    #[tokio::test]
    async fn test_save_and_load_run() {
        let definition = PipelineBuilder::new("memory")
            .stage(StageDefinition::new("outline", SchemaDescriptor::Any))
            .build()
            .unwrap();
        let mut run = PipelineRun::new(&definition, serde_json::json!({"topic": "rust"}));
        let store = InMemoryPipelineStore::new();

        store.save_run(&run).await.unwrap();
        run.status = RunStatus::Running;
        // The stored snapshot does not follow later mutations.
        assert_eq!(store.load_run(run.id).await.unwrap().status, RunStatus::Pending);

        store.save_run(&run).await.unwrap();
        assert_eq!(store.load_run(run.id).await.unwrap(), run);
        assert_eq!(store.run_saves(), 2);
        assert_eq!(store.run_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_entries() {
        let store = InMemoryPipelineStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.load_run(id).await,
            Err(PersistenceError::RunNotFound(missing)) if missing == id
        ));
        assert!(matches!(
            store.load_assembled_record(id).await,
            Err(PersistenceError::RecordNotFound(_))
        ));
        assert_eq!(store.record_count(), 0);
    }
}
