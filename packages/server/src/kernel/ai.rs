// AI implementation using OpenAI
//
// This is the infrastructure implementation of BaseAI.
// Business logic (what to prompt for) lives in domain layers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use openai_client::{ChatRequest, Message, OpenAIClient};
use tracing::debug;

use super::BaseAI;

/// OpenAI-backed completion for a single configured model
#[derive(Clone)]
pub struct OpenAIAnswerModel {
    client: OpenAIClient,
    model: String,
}

impl OpenAIAnswerModel {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: OpenAIClient::new(api_key),
            model: model.into(),
        }
    }

    /// Point at any OpenAI-compatible endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.client = self.client.with_base_url(base_url);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl BaseAI for OpenAIAnswerModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest::new(&self.model).message(Message::user(prompt));

        let response = self
            .client
            .chat_completion(request)
            .await
            .with_context(|| format!("OpenAI completion failed (model {})", self.model))?;

        if let Some(usage) = &response.usage {
            debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion finished"
            );
        }

        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_is_configurable() {
        let ai = OpenAIAnswerModel::new("sk-test", "gpt-4o").with_base_url("http://localhost:8080/v1/");
        assert_eq!(ai.model(), "gpt-4o");
    }
}
