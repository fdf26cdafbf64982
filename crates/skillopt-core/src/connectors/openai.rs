//! OpenAI-compatible LLM client
//!
//! Production implementation of [`LlmClient`] over the OpenAI API surface.
//! Requires OPENAI_API_KEY in the environment (or an explicit key).

use anyhow::{Context, Result};
use async_openai::{
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
        CreateEmbeddingRequestArgs,
    },
    Client,
};
use async_trait::async_trait;

use super::llm::LlmClient;

/// LLM client backed by the OpenAI API (or any compatible endpoint).
pub struct OpenAiClient {
    client: Client<async_openai::config::OpenAIConfig>,
    judge_model: String,
}

impl OpenAiClient {
    /// Create a client using OPENAI_API_KEY from the environment.
    pub fn new(judge_model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            judge_model: judge_model.into(),
        }
    }

    /// Create a client with an explicit API key.
    pub fn with_api_key(api_key: &str, judge_model: impl Into<String>) -> Self {
        let config = async_openai::config::OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            judge_model: judge_model.into(),
        }
    }

    /// The chat model used for judge and generation calls.
    pub fn judge_model(&self) -> &str {
        &self.judge_model
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .input(text)
            .build()?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .context("OpenAI embedding request failed")?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .context("OpenAI returned no embedding")?;

        Ok(embedding.embedding)
    }

    async fn judge(
        &self,
        prompt: &str,
        json_schema: Option<&serde_json::Value>,
    ) -> Result<String> {
        // The schema is inlined into the prompt rather than sent as a
        // response_format so compatible endpoints without structured-output
        // support still work.
        let content = match json_schema {
            Some(schema) => format!(
                "{prompt}\n\nRespond with JSON matching this schema exactly:\n{}",
                serde_json::to_string_pretty(schema)?
            ),
            None => prompt.to_string(),
        };

        let messages = vec![ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(content),
                name: None,
            },
        )];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.judge_model)
            .messages(messages)
            .build()?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .context("OpenAI chat request failed")?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .context("No completion choices returned")?;

        Ok(choice.message.content.unwrap_or_default())
    }
}
