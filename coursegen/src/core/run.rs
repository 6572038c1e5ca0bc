//! Pipeline runs and their per-stage executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::{RunStatus, StageStatus};
use crate::errors::{InvalidTransition, StageErrorRecord};
use crate::pipeline::PipelineDefinition;

/// The execution state of one stage within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageExecution {
    /// The stage name.
    pub stage: String,
    /// Current status.
    pub status: StageStatus,
    /// Number of attempts started so far.
    pub attempts: u32,
    /// Error of the most recent failed attempt.
    pub last_error: Option<StageErrorRecord>,
    /// The validated output, present once succeeded.
    pub output: Option<serde_json::Value>,
    /// When the first attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageExecution {
    /// Creates a blocked execution for `stage`.
    #[must_use]
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            status: StageStatus::Blocked,
            attempts: 0,
            last_error: None,
            output: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Moves to `next`, returning the previous status.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the state machine forbids the move.
    pub fn transition(&mut self, next: StageStatus) -> Result<StageStatus, InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                stage: self.stage.clone(),
                from: self.status,
                to: next,
            });
        }
        let previous = self.status;
        self.status = next;
        match next {
            StageStatus::Running => {
                self.attempts += 1;
                self.started_at.get_or_insert_with(Utc::now);
            }
            StageStatus::Succeeded | StageStatus::Failed => {
                self.finished_at = Some(Utc::now());
            }
            _ => {}
        }
        Ok(previous)
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.status == StageStatus::Succeeded
    }
}

/// Why a run failed: the first stage that exhausted its budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// The stage.
    pub stage: String,
    /// Attempts it made.
    pub attempts: u32,
    /// Its last error.
    pub error: StageErrorRecord,
}

/// One execution of a pipeline definition over a seed input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Run identifier.
    pub id: Uuid,
    /// The definition this run instantiates.
    pub definition_id: String,
    /// Seed input (e.g. the course topic).
    pub seed: serde_json::Value,
    /// Run status.
    pub status: RunStatus,
    /// Per-stage executions keyed by stage name.
    pub stages: BTreeMap<String, StageExecution>,
    /// Set when the run failed.
    pub failure: Option<RunFailure>,
    /// Set when the run was cancelled.
    pub cancel_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    /// Creates a pending run with a blocked execution for every stage.
    #[must_use]
    pub fn new(definition: &PipelineDefinition, seed: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            definition_id: definition.id().to_string(),
            seed,
            status: RunStatus::Pending,
            stages: definition
                .stage_names()
                .map(|name| (name.to_string(), StageExecution::new(name)))
                .collect(),
            failure: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the execution of `stage`.
    #[must_use]
    pub fn stage(&self, stage: &str) -> Option<&StageExecution> {
        self.stages.get(stage)
    }

    /// Names of all succeeded stages.
    #[must_use]
    pub fn succeeded_stages(&self) -> BTreeSet<String> {
        self.stages
            .values()
            .filter(|exec| exec.is_succeeded())
            .map(|exec| exec.stage.clone())
            .collect()
    }

    /// Outputs of succeeded stages keyed by stage name.
    #[must_use]
    pub fn outputs(&self) -> BTreeMap<String, serde_json::Value> {
        self.stages
            .values()
            .filter(|exec| exec.is_succeeded())
            .filter_map(|exec| Some((exec.stage.clone(), exec.output.clone()?)))
            .collect()
    }

    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.stages.values().all(StageExecution::is_succeeded)
    }

    /// Returns true if the run reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Total attempts across all stages.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.stages.values().map(|exec| exec.attempts).sum()
    }

    /// Bumps `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Rewinds interrupted work after a restart.
    ///
    /// Succeeded stages keep their outputs. Stages caught mid-flight go back to
    /// `blocked` so the runner re-derives readiness. Finished attempts and last
    /// errors stay, so the retry budget carries over; an attempt interrupted
    /// while running produced no result and is not charged.
    pub fn prepare_resume(&mut self) {
        for exec in self.stages.values_mut() {
            match exec.status {
                StageStatus::Running => {
                    exec.attempts = exec.attempts.saturating_sub(1);
                    exec.status = StageStatus::Blocked;
                }
                StageStatus::Ready | StageStatus::RetryPending => {
                    exec.status = StageStatus::Blocked;
                }
                _ => {}
            }
        }
        self.status = RunStatus::Pending;
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StageErrorKind;

    #[test]
    fn test_execution_lifecycle() {
        let mut exec = StageExecution::new("outline");
        assert_eq!(exec.status, StageStatus::Blocked);

        exec.transition(StageStatus::Ready).unwrap();
        exec.transition(StageStatus::Running).unwrap();
        assert_eq!(exec.attempts, 1);
        assert!(exec.started_at.is_some());

        exec.transition(StageStatus::RetryPending).unwrap();
        exec.transition(StageStatus::Ready).unwrap();
        exec.transition(StageStatus::Running).unwrap();
        assert_eq!(exec.attempts, 2);

        let previous = exec.transition(StageStatus::Succeeded).unwrap();
        assert_eq!(previous, StageStatus::Running);
        assert!(exec.finished_at.is_some());
    }

    #[test]
    fn test_invalid_transition() {
        let mut exec = StageExecution::new("outline");
        let err = exec.transition(StageStatus::Running).unwrap_err();
        assert_eq!(err.from, StageStatus::Blocked);
        assert_eq!(err.to, StageStatus::Running);
        assert_eq!(exec.status, StageStatus::Blocked);
        assert_eq!(exec.attempts, 0);
    }

    #[test]
    fn test_prepare_resume_keeps_progress() {
        let definition = crate::pipeline::PipelineBuilder::new("resume")
            .stage(crate::stages::StageDefinition::new("a", crate::schema::SchemaDescriptor::Any))
            .stage(
                crate::stages::StageDefinition::new("b", crate::schema::SchemaDescriptor::Any)
                    .with_dependency("a"),
            )
            .build()
            .unwrap();
        let mut run = PipelineRun::new(&definition, serde_json::json!({"topic": "rust"}));
        run.status = RunStatus::Running;

        let a = run.stages.get_mut("a").unwrap();
        a.status = StageStatus::Succeeded;
        a.output = Some(serde_json::json!({"ok": true}));

        let b = run.stages.get_mut("b").unwrap();
        b.status = StageStatus::Running;
        b.attempts = 2;
        b.last_error = Some(StageErrorRecord {
            kind: StageErrorKind::Generation,
            message: "boom".to_string(),
            path: None,
        });

        run.prepare_resume();

        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.stage("a").unwrap().status, StageStatus::Succeeded);
        assert_eq!(run.stage("b").unwrap().status, StageStatus::Blocked);
        assert_eq!(run.stage("b").unwrap().attempts, 1);
        assert!(run.stage("b").unwrap().last_error.is_some());
        assert_eq!(run.succeeded_stages().len(), 1);
        assert_eq!(run.outputs().len(), 1);
    }
}
