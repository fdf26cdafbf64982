//! LLM gateway contract
//!
//! Two capabilities cover everything the engine asks of a model: embedding
//! request fingerprints and answering judge/generation prompts. The engine
//! wraps every call with a deadline and a concurrency bound; implementations
//! just talk to their provider.

use anyhow::Result;
use async_trait::async_trait;

/// Client for the LLM gateway the engine itself depends on.
#[async_trait]
pub trait LlmClient: Send + Sync + 'static {
    /// Embed a text with the given embedding model.
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>>;

    /// Ask the judge/generator model for a completion.
    ///
    /// `json_schema`, when present, describes the JSON shape the reply must
    /// take; implementations may enforce it natively or inline it into the
    /// prompt. The raw completion text is returned either way — parsing and
    /// fallback behavior belong to the caller.
    async fn judge(&self, prompt: &str, json_schema: Option<&serde_json::Value>)
        -> Result<String>;
}
