//! The generation capability.

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

use super::PromptMaterial;
use crate::errors::GenerationError;
use crate::schema::SchemaDescriptor;

/// A generative model producing structured output.
///
/// Implementations may be slow, may fail, and may return structurally
/// invalid data even on success; the runner validates every result and
/// enforces `timeout` on its own.
#[async_trait]
pub trait Generator: Send + Sync + Debug {
    /// Generates a structured result for `prompt` shaped like `schema`.
    async fn generate(
        &self,
        prompt: &PromptMaterial,
        schema: &SchemaDescriptor,
        timeout: Duration,
    ) -> Result<serde_json::Value, GenerationError>;
}
