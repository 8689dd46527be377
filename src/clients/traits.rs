use async_trait::async_trait;
use thiserror::Error;

use crate::prompts::PromptKind;

/// One completion call for one pipeline stage
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub stage: PromptKind,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    /// Deterministic request using the stage's response budget
    pub fn for_stage(stage: PromptKind, prompt: String) -> Self {
        Self {
            stage,
            prompt,
            max_tokens: stage.max_tokens(),
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Transport(String),
    #[error("model service returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("model response could not be decoded: {0}")]
    Decode(String),
    #[error("model returned no text content")]
    Empty,
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ModelError::Decode(err.to_string())
        } else {
            ModelError::Transport(err.to_string())
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Raw response text for the prompt. No retries.
    async fn complete(&self, request: CompletionRequest) -> Result<String, ModelError>;

    /// Model identifier recorded with results
    fn model_id(&self) -> &str;
}
