//! Prompt construction from upstream outputs.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::StageDefinition;

/// Everything a generator needs to know to produce one stage's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMaterial {
    /// The stage being generated.
    pub stage: String,
    /// Stage instructions.
    pub instructions: String,
    /// The run's seed input.
    pub seed: Value,
    /// Outputs of the stage's declared dependencies.
    pub upstream: BTreeMap<String, Value>,
}

/// Builds the prompt material for `stage`.
///
/// Pure: only the outputs of `stage`'s declared dependencies are copied in,
/// whatever else `outputs` holds.
#[must_use]
pub fn build_prompt(
    stage: &StageDefinition,
    seed: &Value,
    outputs: &BTreeMap<String, Value>,
) -> PromptMaterial {
    let upstream = stage
        .dependencies
        .iter()
        .filter_map(|dep| Some((dep.clone(), outputs.get(dep)?.clone())))
        .collect();

    PromptMaterial {
        stage: stage.name.clone(),
        instructions: stage.instructions.clone(),
        seed: seed.clone(),
        upstream,
    }
}

impl PromptMaterial {
    /// Renders the material as plain text for text-in, JSON-out providers.
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = self.instructions.clone();
        let _ = write!(text, "\n\n## Seed\n{}", pretty(&self.seed));
        for (stage, output) in &self.upstream {
            let _ = write!(text, "\n\n## Output of {stage}\n{}", pretty(output));
        }
        text
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
