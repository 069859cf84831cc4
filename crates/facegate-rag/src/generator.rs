use async_trait::async_trait;
use rig::client::{CompletionClient, ProviderClient};
use rig::completion::Prompt;
use rig::providers::anthropic;
use thiserror::Error;

pub const DEFAULT_MAX_TOKENS: u64 = 150;

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("{0} is not set")]
    MissingApiKey(&'static str),
    #[error("language model: {0}")]
    Model(String),
}

/// Produces an answer for a fully built prompt.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

/// Anthropic-backed generator with greedy decoding and a bounded answer.
pub struct RigGenerator {
    model: String,
    max_tokens: u64,
}

impl RigGenerator {
    const API_KEY_VAR: &'static str = "ANTHROPIC_API_KEY";

    /// Fails early when the API key is missing instead of at the first call.
    pub fn from_env(model: impl Into<String>, max_tokens: u64) -> Result<Self, GenerateError> {
        if std::env::var(Self::API_KEY_VAR).map_or(true, |v| v.trim().is_empty()) {
            return Err(GenerateError::MissingApiKey(Self::API_KEY_VAR));
        }
        Ok(Self {
            model: model.into(),
            max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl AnswerGenerator for RigGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let client = anthropic::Client::from_env();
        let agent = client
            .agent(&self.model)
            .temperature(0.0)
            .max_tokens(self.max_tokens)
            .build();

        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "generating answer");
        let answer = agent
            .prompt(prompt)
            .await
            .map_err(|e| GenerateError::Model(e.to_string()))?;
        Ok(answer.trim().to_string())
    }
}
