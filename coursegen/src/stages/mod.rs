//! Stage definitions and the generation capability.
//!
//! A stage is one schema-validated unit of generative work: its dependencies,
//! the prompt instructions, the output contract and the retry policy that
//! governs it.

mod generator;
#[cfg(feature = "http")]
mod http;
mod prompt;

pub use generator::Generator;
#[cfg(feature = "http")]
pub use http::HttpGenerator;
pub use prompt::{build_prompt, PromptMaterial};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use std::time::Duration;

use crate::errors::DefinitionError;
use crate::pipeline::RetryPolicy;
use crate::schema::SchemaDescriptor;

/// Default per-attempt timeout.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(120);

/// Where a stage's output lands in the assembled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "slot", rename_all = "snake_case")]
pub enum HierarchySlot {
    /// Course title, summary and the chapter list.
    Course,
    /// Lessons of the chapter with this order value.
    Lessons {
        /// Chapter order value.
        chapter: u32,
    },
    /// Concepts attached to lessons of this chapter.
    Concepts {
        /// Chapter order value.
        chapter: u32,
    },
    /// Exercises attached to lessons of this chapter.
    Exercises {
        /// Chapter order value.
        chapter: u32,
    },
    /// Intermediate work that feeds other stages but is not assembled.
    #[default]
    Auxiliary,
}

impl HierarchySlot {
    /// The chapter a per-chapter slot belongs to.
    #[must_use]
    pub fn chapter(&self) -> Option<u32> {
        match self {
            Self::Lessons { chapter } | Self::Concepts { chapter } | Self::Exercises { chapter } => {
                Some(*chapter)
            }
            Self::Course | Self::Auxiliary => None,
        }
    }
}

/// Specification for a single stage in a pipeline. Immutable once built.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    /// The unique name of the stage.
    pub name: String,
    /// Names of stages this stage depends on.
    pub dependencies: BTreeSet<String>,
    /// Shape the generated output must have.
    pub output_schema: SchemaDescriptor,
    /// Retry budget and backoff.
    pub retry: RetryPolicy,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Prompt instructions handed to the generator.
    pub instructions: String,
    /// Assembly position.
    pub slot: HierarchySlot,
}

impl StageDefinition {
    /// Creates a new stage definition with default retry and timeout.
    #[must_use]
    pub fn new(name: impl Into<String>, output_schema: SchemaDescriptor) -> Self {
        Self {
            name: name.into(),
            dependencies: BTreeSet::new(),
            output_schema,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_STAGE_TIMEOUT,
            instructions: String::new(),
            slot: HierarchySlot::Auxiliary,
        }
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the prompt instructions.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Sets the assembly slot.
    #[must_use]
    pub fn with_slot(mut self, slot: HierarchySlot) -> Self {
        self.slot = slot;
        self
    }

    /// Validates the stage in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed name or a self-dependency.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if !stage_name_pattern().is_match(&self.name) {
            return Err(DefinitionError::invalid_name(&self.name));
        }
        if self.dependencies.contains(&self.name) {
            return Err(DefinitionError::self_dependency(&self.name));
        }
        Ok(())
    }
}

fn stage_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^[a-z][a-z0-9_-]*$").unwrap()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DefinitionErrorKind;

    #[test]
    fn test_stage_definition_creation() {
        let stage = StageDefinition::new("chapter-0-lessons", SchemaDescriptor::Any)
            .with_dependencies(["outline"])
            .with_timeout(Duration::from_secs(5))
            .with_slot(HierarchySlot::Lessons { chapter: 0 });

        assert_eq!(stage.dependencies.len(), 1);
        assert_eq!(stage.timeout, Duration::from_secs(5));
        assert_eq!(stage.slot, HierarchySlot::Lessons { chapter: 0 });
        assert!(stage.validate().is_ok());
    }

    #[test]
    fn test_stage_self_dependency() {
        let stage = StageDefinition::new("outline", SchemaDescriptor::Any).with_dependency("outline");
        assert_eq!(stage.validate().unwrap_err().kind, DefinitionErrorKind::SelfDependency);
    }

    #[test]
    fn test_stage_name_rules() {
        for bad in ["", "Outline", "1st", "has space", "dots.bad"] {
            let err = StageDefinition::new(bad, SchemaDescriptor::Any).validate().unwrap_err();
            assert_eq!(err.kind, DefinitionErrorKind::InvalidName, "{bad}");
        }
        assert!(StageDefinition::new("chapter_1-x", SchemaDescriptor::Any).validate().is_ok());
    }

    #[test]
    fn test_slot_serialize() {
        let json = serde_json::to_value(HierarchySlot::Concepts { chapter: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"slot": "concepts", "chapter": 2}));
    }
}
