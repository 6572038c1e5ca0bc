//! The standard course pipeline.
//!
//! For `n` chapters the blueprint builds:
//!
//! ```text
//! outline ─┬─> chapter-0-lessons ─> chapter-0-concepts ─> chapter-0-exercises
//!          ├─> chapter-1-lessons ─> chapter-1-concepts ─> chapter-1-exercises
//!          └─> ...
//! ```
//!
//! Chapters proceed independently once the outline exists.

pub mod schemas;

use std::time::Duration;

use crate::config::EngineConfig;
use crate::errors::DefinitionError;
use crate::pipeline::{PipelineBuilder, PipelineDefinition, RetryPolicy};
use crate::stages::{HierarchySlot, StageDefinition, DEFAULT_STAGE_TIMEOUT};

/// Name of the outline stage.
pub const OUTLINE_STAGE: &str = "outline";

/// Name of the lessons stage of chapter `chapter`.
#[must_use]
pub fn lessons_stage(chapter: u32) -> String {
    format!("chapter-{chapter}-lessons")
}

/// Name of the concepts stage of chapter `chapter`.
#[must_use]
pub fn concepts_stage(chapter: u32) -> String {
    format!("chapter-{chapter}-concepts")
}

/// Name of the exercises stage of chapter `chapter`.
#[must_use]
pub fn exercises_stage(chapter: u32) -> String {
    format!("chapter-{chapter}-exercises")
}

/// Builds the standard course definition.
#[derive(Debug, Clone)]
pub struct CourseBlueprint {
    chapters: u32,
    retry: RetryPolicy,
    timeout: Duration,
}

impl CourseBlueprint {
    /// A blueprint for a course of `chapters` chapters.
    #[must_use]
    pub fn new(chapters: u32) -> Self {
        Self {
            chapters,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    /// Takes the stage retry policy and timeout from `config`.
    #[must_use]
    pub fn with_config(self, config: &EngineConfig) -> Self {
        self.with_retry(config.stage_retry.clone())
            .with_timeout(config.stage_timeout())
    }

    /// Sets the retry policy of every stage.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt timeout of every stage.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of chapters.
    #[must_use]
    pub fn chapters(&self) -> u32 {
        self.chapters
    }

    /// Builds the pipeline definition registered as `id`.
    ///
    /// # Errors
    ///
    /// Propagates [`PipelineBuilder::build`] errors.
    pub fn definition(&self, id: impl Into<String>) -> Result<PipelineDefinition, DefinitionError> {
        let mut builder = PipelineBuilder::new(id).stage(
            self.stage(OUTLINE_STAGE, schemas::outline(self.chapters as usize))
                .with_slot(HierarchySlot::Course)
                .with_instructions(format!(
                    "Plan a course on the topic given in the seed. Write a title, a summary and \
                     exactly {} chapters numbered from 0 in the `order` field.",
                    self.chapters
                )),
        );

        for chapter in 0..self.chapters {
            builder = builder
                .stage(
                    self.stage(&lessons_stage(chapter), schemas::lessons())
                        .with_dependency(OUTLINE_STAGE)
                        .with_slot(HierarchySlot::Lessons { chapter })
                        .with_instructions(format!(
                            "Write the lessons of the outline's chapter with order {chapter}. \
                             Number lessons from 0 in the `order` field."
                        )),
                )
                .stage(
                    self.stage(&concepts_stage(chapter), schemas::concepts())
                        .with_dependency(lessons_stage(chapter))
                        .with_slot(HierarchySlot::Concepts { chapter })
                        .with_instructions(
                            "Research the key concepts each lesson relies on. Reference the \
                             lesson through `lesson_order` and give every concept a unique name.",
                        ),
                )
                .stage(
                    self.stage(&exercises_stage(chapter), schemas::exercises())
                        .with_dependencies([lessons_stage(chapter), concepts_stage(chapter)])
                        .with_slot(HierarchySlot::Exercises { chapter })
                        .with_instructions(
                            "Write exercises for each lesson. List the names of the concepts \
                             each exercise practices; only use concepts of the same lesson.",
                        ),
                );
        }

        builder.build()
    }

    fn stage(&self, name: &str, schema: crate::schema::SchemaDescriptor) -> StageDefinition {
        StageDefinition::new(name, schema)
            .with_retry(self.retry.clone())
            .with_timeout(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_blueprint_graph_shape() {
        let definition = CourseBlueprint::new(2).definition("course").unwrap();
        assert_eq!(definition.len(), 7);

        let levels = definition.graph().levels();
        assert_eq!(levels[0], vec![OUTLINE_STAGE.to_string()]);
        assert_eq!(levels[1], vec![lessons_stage(0), lessons_stage(1)]);
        assert_eq!(levels.len(), 4);

        let initial = definition.graph().ready_set(&BTreeSet::new());
        assert_eq!(initial.len(), 1);
        assert!(initial.contains(OUTLINE_STAGE));
    }

    #[test]
    fn test_blueprint_slots_and_config() {
        let mut config = EngineConfig::default();
        config.stage_timeout_ms = 5_000;
        config.stage_retry = RetryPolicy::new().with_max_attempts(7);

        let definition = CourseBlueprint::new(1)
            .with_config(&config)
            .definition("course")
            .unwrap();

        let exercises = definition.stage(&exercises_stage(0)).unwrap();
        assert_eq!(exercises.slot, HierarchySlot::Exercises { chapter: 0 });
        assert_eq!(exercises.timeout, Duration::from_secs(5));
        assert_eq!(exercises.retry.max_attempts, 7);
        assert_eq!(
            definition.stages_in_slot(HierarchySlot::Course).count(),
            1
        );
    }
}
