//! Stage dependency graph.
//!
//! Validated once at definition time; the runner only ever asks it which
//! stages are ready given the set that already succeeded.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::errors::DefinitionError;
use crate::stages::StageDefinition;

/// A validated, acyclic graph of stage dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Stage names in definition order.
    order: Vec<String>,
    /// stage -> stages it depends on.
    dependencies: BTreeMap<String, BTreeSet<String>>,
    /// stage -> stages depending on it.
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Builds the graph from stage definitions.
    ///
    /// # Errors
    ///
    /// Fails on an empty stage list, invalid or duplicate names,
    /// self-dependencies, unknown dependencies and cycles.
    pub fn build(pipeline: &str, stages: &[StageDefinition]) -> Result<Self, DefinitionError> {
        for stage in stages {
            stage.validate()?;
        }
        Self::from_edges(
            pipeline,
            stages
                .iter()
                .map(|stage| (stage.name.clone(), stage.dependencies.clone())),
        )
    }

    /// Builds the graph from `(stage, dependencies)` pairs.
    ///
    /// # Errors
    ///
    /// Same as [`DependencyGraph::build`], minus name-format checks.
    pub fn from_edges<I>(pipeline: &str, edges: I) -> Result<Self, DefinitionError>
    where
        I: IntoIterator<Item = (String, BTreeSet<String>)>,
    {
        let mut order = Vec::new();
        let mut dependencies = BTreeMap::new();

        for (name, deps) in edges {
            if deps.contains(&name) {
                return Err(DefinitionError::self_dependency(&name));
            }
            if dependencies.insert(name.clone(), deps).is_some() {
                return Err(DefinitionError::duplicate(&name));
            }
            order.push(name);
        }

        if order.is_empty() {
            return Err(DefinitionError::empty(pipeline));
        }

        let mut dependents: BTreeMap<String, BTreeSet<String>> =
            order.iter().map(|name| (name.clone(), BTreeSet::new())).collect();

        for name in &order {
            for dep in &dependencies[name] {
                match dependents.get_mut(dep) {
                    Some(children) => {
                        children.insert(name.clone());
                    }
                    None => return Err(DefinitionError::unknown_dependency(name, dep)),
                }
            }
        }

        let graph = Self {
            order,
            dependencies,
            dependents,
        };
        graph.detect_cycles()?;
        Ok(graph)
    }

    /// Every stage not in `completed` whose dependencies all are.
    #[must_use]
    pub fn ready_set(&self, completed: &BTreeSet<String>) -> BTreeSet<String> {
        self.dependencies
            .iter()
            .filter(|(name, _)| !completed.contains(*name))
            .filter(|(_, deps)| deps.iter().all(|dep| completed.contains(dep)))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Stages grouped by depth. Every stage in a level only depends on
    /// stages in earlier levels, so a whole level can run in parallel.
    #[must_use]
    pub fn levels(&self) -> Vec<Vec<String>> {
        let mut completed = BTreeSet::new();
        let mut levels = Vec::new();

        while completed.len() < self.order.len() {
            let ready = self.ready_set(&completed);
            if ready.is_empty() {
                break;
            }
            let level: Vec<String> = self
                .order
                .iter()
                .filter(|name| ready.contains(*name))
                .cloned()
                .collect();
            completed.extend(ready);
            levels.push(level);
        }

        levels
    }

    /// A topological order; ties follow definition order.
    #[must_use]
    pub fn execution_order(&self) -> Vec<String> {
        self.levels().into_iter().flatten().collect()
    }

    /// Stage names in definition order.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Dependencies of `stage`.
    #[must_use]
    pub fn dependencies_of(&self, stage: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(stage)
    }

    /// Stages that depend directly on `stage`.
    #[must_use]
    pub fn dependents_of(&self, stage: &str) -> Option<&BTreeSet<String>> {
        self.dependents.get(stage)
    }

    /// Returns true if `stage` is part of the graph.
    #[must_use]
    pub fn contains(&self, stage: &str) -> bool {
        self.dependencies.contains_key(stage)
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the graph has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn detect_cycles(&self) -> Result<(), DefinitionError> {
        let mut visited = HashSet::new();
        let mut on_path = HashSet::new();
        let mut path = Vec::new();

        for name in &self.order {
            if !visited.contains(name.as_str()) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut on_path, &mut path) {
                    return Err(DefinitionError::cycle(cycle));
                }
            }
        }
        Ok(())
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        on_path: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        on_path.insert(node);
        path.push(node);

        for dep in self.dependencies.get(node).into_iter().flatten() {
            if on_path.contains(dep.as_str()) {
                let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| (*n).to_string()).collect();
                cycle.push(dep.clone());
                return Some(cycle);
            }
            if !visited.contains(dep.as_str()) {
                if let Some(cycle) = self.dfs_cycle(dep, visited, on_path, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        on_path.remove(node);
        None
    }
}
