use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A chat-completion backend
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// One completion request. `system` carries the persona, `prompt` the task.
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub prompt: String,
    /// Ask the backend for a bare JSON object
    pub json_output: bool,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn json(mut self) -> Self {
        self.json_output = true;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

pub mod analyst;
pub mod remote;

/// Pull the JSON object out of a model reply: a fenced block when there is
/// one, else the span from the first `{` to the last `}`.
pub fn extract_json_from_text(text: &str) -> Option<String> {
    for fence in ["```json", "```"] {
        let fenced = text
            .split_once(fence)
            .and_then(|(_, rest)| rest.split_once("```"))
            .map(|(body, _)| body.trim());
        if let Some(body) = fenced {
            return Some(body.to_string());
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| text[start..=end].to_string())
}
