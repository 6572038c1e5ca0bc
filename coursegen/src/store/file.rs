//! JSON-file store.
//!
//! Layout under the root directory:
//!
//! ```text
//! runs/{run_id}.json
//! records/{run_id}.json
//! ```
//!
//! Writes go to a `.json.tmp` sibling first and are renamed into place, so a
//! reader never sees a half-written file.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use super::PipelineStore;
use crate::assembly::AssembledRecord;
use crate::core::PipelineRun;
use crate::errors::PersistenceError;

const RUNS_DIR: &str = "runs";
const RECORDS_DIR: &str = "records";

/// Stores each run and record as a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Opens (and creates, if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Io`] if the directories cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let root = root.into();
        for dir in [RUNS_DIR, RECORDS_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .await
                .map_err(|e| PersistenceError::Io(format!("failed to create {}: {e}", path.display())))?;
        }
        Ok(Self { root })
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_path(&self, run_id: Uuid) -> PathBuf {
        self.root.join(RUNS_DIR).join(format!("{run_id}.json"))
    }

    fn record_path(&self, run_id: Uuid) -> PathBuf {
        self.root.join(RECORDS_DIR).join(format!("{run_id}.json"))
    }

    async fn write_atomic<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| PersistenceError::Corrupt(format!("failed to serialize: {e}")))?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &bytes)
            .await
            .map_err(|e| PersistenceError::Io(format!("failed to write {}: {e}", temp_path.display())))?;

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(PersistenceError::Io(format!(
                "failed to rename {} into place: {e}",
                temp_path.display()
            )));
        }
        Ok(())
    }

    /// Reads and decodes `path`. `Ok(None)` if the file does not exist.
    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PersistenceError::Io(format!("failed to read {}: {e}", path.display())))
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| PersistenceError::Corrupt(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl PipelineStore for JsonFileStore {
    async fn save_run(&self, run: &PipelineRun) -> Result<(), PersistenceError> {
        Self::write_atomic(&self.run_path(run.id), run).await?;
        tracing::trace!(run_id = %run.id, status = %run.status, "Saved run snapshot");
        Ok(())
    }

    async fn save_assembled_record(&self, record: &AssembledRecord) -> Result<(), PersistenceError> {
        Self::write_atomic(&self.record_path(record.run_id), record).await
    }

    async fn load_run(&self, run_id: Uuid) -> Result<PipelineRun, PersistenceError> {
        Self::read_json(&self.run_path(run_id))
            .await?
            .ok_or(PersistenceError::RunNotFound(run_id))
    }

    async fn load_assembled_record(&self, run_id: Uuid) -> Result<AssembledRecord, PersistenceError> {
        Self::read_json(&self.record_path(run_id))
            .await?
            .ok_or(PersistenceError::RecordNotFound(run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::Course;
    use crate::core::StageStatus;
    use crate::pipeline::PipelineBuilder;
    use crate::schema::SchemaDescriptor;
    use crate::stages::StageDefinition;
    use tempfile::TempDir;

    fn run() -> PipelineRun {
        let definition = PipelineBuilder::new("files")
            .stage(StageDefinition::new("outline", SchemaDescriptor::Any))
            .build()
            .unwrap();
        PipelineRun::new(&definition, serde_json::json!({"topic": "rust"}))
    }

    #[tokio::test]
    async fn test_run_round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();

        let mut run = run();
        let exec = run.stages.get_mut("outline").unwrap();
        exec.status = StageStatus::Succeeded;
        exec.output = Some(serde_json::json!({"title": "Rust"}));

        store.save_run(&run).await.unwrap();
        assert_eq!(store.load_run(run.id).await.unwrap(), run);

        // Reopening sees the same data.
        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.load_run(run.id).await.unwrap(), run);
        assert!(!dir.path().join("runs").join(format!("{}.json.tmp", run.id)).exists());
    }

    #[tokio::test]
    async fn test_record_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();

        let course = Course {
            title: "Rust".to_string(),
            summary: "Systems".to_string(),
            chapters: Vec::new(),
        };
        let record = AssembledRecord {
            run_id: Uuid::new_v4(),
            definition_id: "files".to_string(),
            fingerprint: crate::assembly::fingerprint(&course),
            course,
        };

        store.save_assembled_record(&record).await.unwrap();
        assert_eq!(store.load_assembled_record(record.run_id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let id = Uuid::new_v4();

        assert!(matches!(
            store.load_run(id).await,
            Err(PersistenceError::RunNotFound(_))
        ));

        std::fs::write(store.run_path(id), b"{not json").unwrap();
        let err = store.load_run(id).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt(_)));
        assert!(!err.is_retryable());
    }
}
