//! Error types for coursegen.
//!
//! Definition errors surface while a pipeline is being built and never at run
//! time. Generation and schema errors are caught and classified by the job
//! runner; callers only ever see a run's terminal failure. Persistence errors
//! are retried on their own budget.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::core::{RunStatus, StageStatus};

/// The main error type for coursegen operations.
#[derive(Debug, Error)]
pub enum CoursegenError {
    /// The pipeline definition is invalid.
    #[error("{0}")]
    Definition(#[from] DefinitionError),

    /// A structured output did not match its schema.
    #[error("{0}")]
    Schema(#[from] SchemaMismatch),

    /// The generation capability failed.
    #[error("{0}")]
    Generation(#[from] GenerationError),

    /// The storage adapter failed.
    #[error("{0}")]
    Persistence(#[from] PersistenceError),

    /// Assembly of the final record failed.
    #[error("{0}")]
    Assembly(#[from] AssemblyError),

    /// The submission interface rejected a request.
    #[error("{0}")]
    Service(#[from] ServiceError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata about a definition error for better diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "DEFINITION-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// What made a pipeline definition invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionErrorKind {
    /// The dependency edges form a cycle.
    CycleDetected,
    /// A stage names a dependency that is not defined.
    UnknownDependency,
    /// Two stages share a name.
    DuplicateStage,
    /// A stage depends on itself.
    SelfDependency,
    /// A stage name is not a lowercase identifier.
    InvalidName,
    /// The pipeline has no stages.
    Empty,
}

/// Error raised when a pipeline definition fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DefinitionError {
    /// The error category.
    pub kind: DefinitionErrorKind,
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl DefinitionError {
    fn new(
        kind: DefinitionErrorKind,
        message: String,
        stages: Vec<String>,
        error_info: ContractErrorInfo,
    ) -> Self {
        Self {
            kind,
            message,
            stages,
            error_info,
        }
    }

    /// A dependency cycle; `cycle_path` starts and ends on the same stage.
    #[must_use]
    pub fn cycle(cycle_path: Vec<String>) -> Self {
        let joined = cycle_path.join(" -> ");
        let info = ContractErrorInfo::new(
            "DEFINITION-CYCLE",
            format!("Pipeline contains a dependency cycle: {joined}"),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");
        Self::new(
            DefinitionErrorKind::CycleDetected,
            format!("Cycle detected in pipeline: {joined}"),
            cycle_path,
            info,
        )
    }

    /// A stage references a dependency nobody defines.
    #[must_use]
    pub fn unknown_dependency(stage: &str, dependency: &str) -> Self {
        let info = ContractErrorInfo::new(
            "DEFINITION-UNKNOWN-DEP",
            format!("Dependency '{dependency}' not found"),
        )
        .with_fix_hint("Check for typos in stage names.")
        .with_context_entry("stage", stage);
        Self::new(
            DefinitionErrorKind::UnknownDependency,
            format!("Stage '{stage}' depends on unknown stage '{dependency}'"),
            vec![stage.to_string(), dependency.to_string()],
            info,
        )
    }

    /// Two stages were defined under the same name.
    #[must_use]
    pub fn duplicate(stage: &str) -> Self {
        Self::new(
            DefinitionErrorKind::DuplicateStage,
            format!("Stage '{stage}' is defined more than once"),
            vec![stage.to_string()],
            ContractErrorInfo::new("DEFINITION-DUPLICATE", "Stage names must be unique")
                .with_fix_hint("Rename one of the stages."),
        )
    }

    /// A stage lists itself as a dependency.
    #[must_use]
    pub fn self_dependency(stage: &str) -> Self {
        Self::new(
            DefinitionErrorKind::SelfDependency,
            format!("Stage '{stage}' cannot depend on itself"),
            vec![stage.to_string()],
            ContractErrorInfo::new("DEFINITION-SELF-DEP", "A stage cannot depend on itself"),
        )
    }

    /// A stage name is not usable as a key.
    #[must_use]
    pub fn invalid_name(stage: &str) -> Self {
        Self::new(
            DefinitionErrorKind::InvalidName,
            format!("Stage name '{stage}' is invalid"),
            vec![stage.to_string()],
            ContractErrorInfo::new(
                "DEFINITION-NAME",
                "Stage names must match [a-z][a-z0-9_-]*",
            ),
        )
    }

    /// The pipeline was built without stages.
    #[must_use]
    pub fn empty(pipeline: &str) -> Self {
        Self::new(
            DefinitionErrorKind::Empty,
            format!("Pipeline '{pipeline}' has no stages"),
            Vec::new(),
            ContractErrorInfo::new("DEFINITION-EMPTY", "Cannot build an empty pipeline")
                .with_fix_hint("Add at least one stage to the pipeline before building."),
        )
    }
}

/// A structured output that does not match its declared shape.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Schema mismatch at {path}: {message}")]
pub struct SchemaMismatch {
    /// JSON path to the first offending field, e.g. `$.chapters[1].title`.
    pub path: String,
    /// What was wrong at that path.
    pub message: String,
}

impl SchemaMismatch {
    /// Creates a new schema mismatch.
    #[must_use]
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Failures of the generation capability.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The call did not finish within the stage timeout.
    #[error("Generation timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The provider answered with an error.
    #[error("Provider error: {message}")]
    Provider {
        /// Provider message.
        message: String,
        /// HTTP status, if the provider speaks HTTP.
        status: Option<u16>,
    },

    /// The request never reached the provider, or the response was lost.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Any other adapter failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GenerationError {
    /// Creates a provider error without a status code.
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            status: None,
        }
    }
}

/// Classification of a failed stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// Capability failure or timeout.
    Generation,
    /// The output did not match the stage schema.
    SchemaMismatch,
}

impl std::fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generation => write!(f, "generation"),
            Self::SchemaMismatch => write!(f, "schema_mismatch"),
        }
    }
}

/// The error of one stage attempt. Both variants consume the stage's retry budget.
#[derive(Debug, Error)]
pub enum StageError {
    /// The capability failed or timed out.
    #[error("{0}")]
    Generation(#[from] GenerationError),

    /// The capability returned malformed structure.
    #[error("{0}")]
    Schema(#[from] SchemaMismatch),
}

impl StageError {
    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> StageErrorKind {
        match self {
            Self::Generation(_) => StageErrorKind::Generation,
            Self::Schema(_) => StageErrorKind::SchemaMismatch,
        }
    }

    /// Converts to the durable form kept on a stage execution.
    #[must_use]
    pub fn to_record(&self) -> StageErrorRecord {
        StageErrorRecord {
            kind: self.kind(),
            message: self.to_string(),
            path: match self {
                Self::Schema(mismatch) => Some(mismatch.path.clone()),
                Self::Generation(_) => None,
            },
        }
    }
}

/// Serializable record of a stage attempt's error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageErrorRecord {
    /// The error class.
    pub kind: StageErrorKind,
    /// Human readable message.
    pub message: String,
    /// Offending path for schema mismatches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Errors raised by the storage adapter.
#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// No run is stored under this id.
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    /// No assembled record is stored for this run.
    #[error("Assembled record not found for run: {0}")]
    RecordNotFound(Uuid),

    /// A storage write or read failed.
    #[error("Storage I/O failed: {0}")]
    Io(String),

    /// Stored data could not be decoded.
    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),
}

impl PersistenceError {
    /// Returns true for infrastructure failures worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io(_))
    }
}

/// Errors raised while assembling the final record.
#[derive(Debug, Clone, Error)]
pub enum AssemblyError {
    /// Assembly was attempted before the run completed.
    #[error("Pipeline run {run_id} is {status}; assembly requires a completed run")]
    IncompletePipeline {
        /// The run.
        run_id: Uuid,
        /// Its current status.
        status: RunStatus,
    },

    /// A succeeded stage has no output or an output of the wrong shape.
    #[error("Stage '{stage}' output cannot be assembled: {mismatch}")]
    InvalidOutput {
        /// The stage.
        stage: String,
        /// What did not fit.
        mismatch: SchemaMismatch,
    },

    /// Outputs disagree with one another.
    #[error("Assembly conflict in stage '{stage}': {message}")]
    Conflict {
        /// The stage whose output conflicts.
        stage: String,
        /// Description of the conflict.
        message: String,
    },

    /// No stage fills the course slot.
    #[error("No stage provides the course outline")]
    MissingCourse,
}

/// Errors raised by the submission interface.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// No definition is registered under this id.
    #[error("Unknown pipeline definition: {0}")]
    UnknownDefinition(String),

    /// The run is not known to the service or the store.
    #[error("Unknown pipeline run: {0}")]
    UnknownRun(Uuid),

    /// The run is still being executed by this process.
    #[error("Pipeline run {0} is already running")]
    AlreadyRunning(Uuid),

    /// The run reached a terminal state and cannot be resumed.
    #[error("Pipeline run {run_id} is {status} and cannot be resumed")]
    NotResumable {
        /// The run.
        run_id: Uuid,
        /// Its terminal status.
        status: RunStatus,
    },

    /// A persisted run was produced by another definition.
    #[error("Run belongs to definition '{expected}', not '{actual}'")]
    DefinitionMismatch {
        /// The definition recorded on the run.
        expected: String,
        /// The definition offered for resumption.
        actual: String,
    },
}

/// An illegal stage state transition. Indicates a runner bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stage '{stage}' cannot move from {from} to {to}")]
pub struct InvalidTransition {
    /// The stage.
    pub stage: String,
    /// Current status.
    pub from: StageStatus,
    /// Requested status.
    pub to: StageStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "outline");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"outline".to_string()));
    }

    #[test]
    fn test_cycle_error() {
        let err = DefinitionError::cycle(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "a".to_string(),
        ]);

        assert_eq!(err.kind, DefinitionErrorKind::CycleDetected);
        assert!(err.to_string().contains("a -> b -> c -> a"));
        assert_eq!(err.error_info.code, "DEFINITION-CYCLE");
    }

    #[test]
    fn test_unknown_dependency_error() {
        let err = DefinitionError::unknown_dependency("lessons", "outlin");
        assert_eq!(err.kind, DefinitionErrorKind::UnknownDependency);
        assert_eq!(err.stages, vec!["lessons".to_string(), "outlin".to_string()]);
    }

    #[test]
    fn test_stage_error_classification() {
        let schema: StageError = SchemaMismatch::new("$.title", "missing required field").into();
        assert_eq!(schema.kind(), StageErrorKind::SchemaMismatch);
        assert_eq!(schema.to_record().path.as_deref(), Some("$.title"));

        let timeout: StageError = GenerationError::Timeout { timeout_ms: 50 }.into();
        assert_eq!(timeout.kind(), StageErrorKind::Generation);
        assert!(timeout.to_record().path.is_none());
    }

    #[test]
    fn test_persistence_retryable() {
        assert!(PersistenceError::Unavailable("down".into()).is_retryable());
        assert!(PersistenceError::Io("disk".into()).is_retryable());
        assert!(!PersistenceError::RunNotFound(Uuid::nil()).is_retryable());
        assert!(!PersistenceError::Corrupt("bad json".into()).is_retryable());
    }

    #[test]
    fn test_stage_error_record_serialize() {
        let record = StageErrorRecord {
            kind: StageErrorKind::SchemaMismatch,
            message: "bad".to_string(),
            path: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "schema_mismatch");
        assert!(json.get("path").is_none());
    }
}
