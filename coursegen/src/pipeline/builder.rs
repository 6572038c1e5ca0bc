//! Pipeline builder with validation.

use std::collections::HashMap;
use std::sync::Arc;

use super::DependencyGraph;
use crate::errors::DefinitionError;
use crate::stages::{HierarchySlot, StageDefinition};

/// Builder for creating validated pipeline definitions.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline identifier.
    id: String,
    /// Stages in insertion order.
    stages: Vec<StageDefinition>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stages: Vec::new(),
        }
    }

    /// Adds a stage. Dependencies may name stages added later; everything is
    /// checked in [`PipelineBuilder::build`].
    #[must_use]
    pub fn stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }

    /// Adds several stages.
    #[must_use]
    pub fn stages(mut self, stages: impl IntoIterator<Item = StageDefinition>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Number of stages added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if no stage was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Validates the stages and builds the definition.
    ///
    /// # Errors
    ///
    /// Returns a [`DefinitionError`] for cycles, unknown or self
    /// dependencies, duplicate or malformed names, and empty pipelines.
    pub fn build(self) -> Result<PipelineDefinition, DefinitionError> {
        let graph = DependencyGraph::build(&self.id, &self.stages)?;

        let order: Vec<Arc<StageDefinition>> = self.stages.into_iter().map(Arc::new).collect();
        let index = order
            .iter()
            .enumerate()
            .map(|(i, stage)| (stage.name.clone(), i))
            .collect();

        tracing::debug!(pipeline = %self.id, stages = order.len(), "Built pipeline definition");

        Ok(PipelineDefinition {
            id: self.id,
            stages: order,
            index,
            graph,
        })
    }
}

/// A validated pipeline: stages plus their acyclic dependency graph.
///
/// Cheap to share behind an `Arc`; runs never mutate it.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    id: String,
    stages: Vec<Arc<StageDefinition>>,
    index: HashMap<String, usize>,
    graph: DependencyGraph,
}

impl PipelineDefinition {
    /// Returns the pipeline identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&Arc<StageDefinition>> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Stages in definition order.
    #[must_use]
    pub fn stages(&self) -> &[Arc<StageDefinition>] {
        &self.stages
    }

    /// Stage names in definition order.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|stage| stage.name.as_str())
    }

    /// Stages assigned to `slot`.
    pub fn stages_in_slot(&self, slot: HierarchySlot) -> impl Iterator<Item = &Arc<StageDefinition>> {
        self.stages.iter().filter(move |stage| stage.slot == slot)
    }

    /// The dependency graph.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a built definition.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DefinitionErrorKind;
    use crate::schema::SchemaDescriptor;

    fn stage(name: &str, deps: &[&str]) -> StageDefinition {
        StageDefinition::new(name, SchemaDescriptor::Any).with_dependencies(deps.iter().copied())
    }

    #[test]
    fn test_build_linear_pipeline() {
        let definition = PipelineBuilder::new("linear")
            .stage(stage("outline", &[]))
            .stage(stage("lessons", &["outline"]))
            .stage(stage("concepts", &["lessons"]))
            .build()
            .unwrap();

        assert_eq!(definition.id(), "linear");
        assert_eq!(definition.len(), 3);
        assert_eq!(
            definition.stage_names().collect::<Vec<_>>(),
            vec!["outline", "lessons", "concepts"]
        );
        assert_eq!(definition.stage("lessons").unwrap().dependencies.len(), 1);
        assert!(definition.stage("missing").is_none());
        assert_eq!(definition.graph().levels().len(), 3);
    }

    #[test]
    fn test_build_rejects_cycle() {
        let err = PipelineBuilder::new("cyclic")
            .stage(stage("a", &["b"]))
            .stage(stage("b", &["a"]))
            .build()
            .unwrap_err();

        assert_eq!(err.kind, DefinitionErrorKind::CycleDetected);
        assert!(err.stages.contains(&"a".to_string()));
        assert!(err.stages.contains(&"b".to_string()));
    }

    #[test]
    fn test_build_rejects_invalid_name() {
        let err = PipelineBuilder::new("names")
            .stage(stage("Outline", &[]))
            .build()
            .unwrap_err();
        assert_eq!(err.kind, DefinitionErrorKind::InvalidName);
    }

    #[test]
    fn test_build_rejects_empty() {
        let builder = PipelineBuilder::new("empty");
        assert!(builder.is_empty());
        assert_eq!(builder.build().unwrap_err().kind, DefinitionErrorKind::Empty);
    }

    #[test]
    fn test_stages_in_slot() {
        let definition = PipelineBuilder::new("slots")
            .stage(stage("outline", &[]).with_slot(HierarchySlot::Course))
            .stage(stage("notes", &["outline"]))
            .build()
            .unwrap();

        let course: Vec<_> = definition
            .stages_in_slot(HierarchySlot::Course)
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(course, vec!["outline"]);
    }
}
