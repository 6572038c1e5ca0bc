//! Scripted generator.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::GenerationError;
use crate::schema::SchemaDescriptor;
use crate::stages::{Generator, PromptMaterial};

/// One scripted outcome of a generation call.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Return this value (valid or not).
    Output(Value),
    /// Fail with a provider error.
    Fail(String),
    /// Never answer; the runner's timeout fires.
    Hang,
}

/// A generator replaying per-stage scripts.
///
/// Each call pops the stage's next step; the last step repeats once the
/// script is exhausted. Calls for unscripted stages fail.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<PromptMaterial>>,
    latency: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: AtomicUsize,
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedGenerator {
    /// Creates a generator with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every answer by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Scripts `stage`.
    #[must_use]
    pub fn script(self, stage: impl Into<String>, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .insert(stage.into(), steps.into_iter().collect());
        self
    }

    /// Scripts `stage` to always return `output`.
    #[must_use]
    pub fn succeed(self, stage: impl Into<String>, output: Value) -> Self {
        self.script(stage, [Step::Output(output)])
    }

    /// Every prompt received, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<PromptMaterial> {
        self.calls.lock().clone()
    }

    /// Number of calls made for `stage`.
    #[must_use]
    pub fn calls_for(&self, stage: &str) -> usize {
        self.calls.lock().iter().filter(|p| p.stage == stage).count()
    }

    /// Highest number of calls in progress at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_step(&self, stage: &str) -> Option<Step> {
        let mut scripts = self.scripts.lock();
        let steps = scripts.get_mut(stage)?;
        if steps.len() > 1 {
            steps.pop_front()
        } else {
            steps.front().cloned()
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &PromptMaterial,
        _schema: &SchemaDescriptor,
        _timeout: Duration,
    ) -> Result<Value, GenerationError> {
        self.calls.lock().push(prompt.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(self.in_flight.clone());

        let step = self.next_step(&prompt.stage);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match step {
            Some(Step::Output(value)) => Ok(value),
            Some(Step::Fail(message)) => Err(GenerationError::provider(message)),
            Some(Step::Hang) => {
                std::future::pending::<()>().await;
                Err(GenerationError::provider("unreachable"))
            }
            None => Err(GenerationError::provider(format!(
                "no script for stage '{}'",
                prompt.stage
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn prompt(stage: &str) -> PromptMaterial {
        PromptMaterial {
            stage: stage.to_string(),
            instructions: String::new(),
            seed: Value::Null,
            upstream: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_script_then_repeat_last() {
        let generator = ScriptedGenerator::new().script(
            "outline",
            [Step::Fail("down".to_string()), Step::Output(json!({"ok": true}))],
        );
        let timeout = Duration::from_secs(1);

        assert!(generator
            .generate(&prompt("outline"), &SchemaDescriptor::Any, timeout)
            .await
            .is_err());
        for _ in 0..2 {
            let value = generator
                .generate(&prompt("outline"), &SchemaDescriptor::Any, timeout)
                .await
                .unwrap();
            assert_eq!(value, json!({"ok": true}));
        }
        assert_eq!(generator.calls_for("outline"), 3);
    }

    #[tokio::test]
    async fn test_unscripted_stage_fails() {
        let generator = ScriptedGenerator::new();
        let err = generator
            .generate(&prompt("ghost"), &SchemaDescriptor::Any, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
        assert_eq!(generator.peak_concurrency(), 1);
    }
}
