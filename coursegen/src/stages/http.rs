//! Generator backed by an OpenAI-compatible chat completions endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{Generator, PromptMaterial};
use crate::errors::GenerationError;
use crate::schema::SchemaDescriptor;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const SYSTEM_PROMPT: &str =
    "You produce course material. Answer with a single JSON document matching the given schema.";

/// Calls a chat completions API with a JSON-schema response format.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl HttpGenerator {
    /// Creates a generator for `model` at `base_url`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GenerationError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
        })
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn request_body(&self, prompt: &PromptMaterial, schema: &SchemaDescriptor) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt.render() },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": prompt.stage, "schema": schema.to_json_schema() },
            },
        })
    }
}

fn map_http_error(error: &reqwest::Error, timeout: Duration) -> GenerationError {
    if error.is_timeout() {
        GenerationError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else if let Some(status) = error.status() {
        GenerationError::Provider {
            message: error.to_string(),
            status: Some(status.as_u16()),
        }
    } else {
        GenerationError::Transport(error.to_string())
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(
        &self,
        prompt: &PromptMaterial,
        schema: &SchemaDescriptor,
        timeout: Duration,
    ) -> Result<Value, GenerationError> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(timeout)
            .json(&self.request_body(prompt, schema));
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| map_http_error(&e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(GenerationError::Provider {
                message,
                status: Some(status.as_u16()),
            });
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::provider(format!("failed to parse response: {e}")))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::provider("response has no content"))?;

        // Non-JSON content is handed on as a string so validation rejects it
        // as a schema mismatch rather than a provider failure.
        Ok(serde_json::from_str(&content).unwrap_or(Value::String(content)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSchema;
    use std::collections::BTreeMap;

    #[test]
    fn test_request_body_carries_schema() {
        let generator = HttpGenerator::new("http://localhost:8080/v1/", "test-model").unwrap();
        assert_eq!(generator.base_url, "http://localhost:8080/v1");

        let prompt = PromptMaterial {
            stage: "outline".to_string(),
            instructions: "Outline the course.".to_string(),
            seed: json!({"topic": "rust"}),
            upstream: BTreeMap::new(),
        };
        let schema = SchemaDescriptor::object([FieldSchema::required("title", SchemaDescriptor::String)]);

        let body = generator.request_body(&prompt, &schema);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["response_format"]["json_schema"]["name"], "outline");
        assert_eq!(
            body["response_format"]["json_schema"]["schema"]["required"],
            json!(["title"])
        );
    }
}
