use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};

/// Client for an OpenAI-compatible `chat/completions` endpoint.
pub struct RemoteLlmProvider {
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
    max_tokens: usize,
    temperature: f32,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(30),
            max_tokens: 1200,
            temperature: 0.2,
            client: reqwest::Client::new(),
        }
    }

    /// Fallbacks for requests that leave these unset
    pub fn with_defaults(mut self, timeout_secs: u64, max_tokens: usize, temperature: f32) -> Self {
        self.timeout = Duration::from_secs(timeout_secs);
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    fn body(&self, request: LlmRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: Some(system),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: Some(request.prompt),
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            temperature: request.temperature.unwrap_or(self.temperature),
            response_format: request.json_output.then(|| ResponseFormat {
                kind: "json_object",
            }),
        }
    }

    async fn exchange(&self, body: &ChatRequest) -> Result<ChatResponse> {
        let mut http = self.client.post(&self.endpoint).json(body);
        if !self.api_key.is_empty() {
            http = http.bearer_auth(&self.api_key);
        }

        let response = http.send().await.context("LLM HTTP request failed")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error {}: {}", status, detail);
        }

        response
            .json::<ChatResponse>()
            .await
            .context("Failed to parse LLM response")
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);
        let body = self.body(request);

        // covers the response body as well as the headers
        let reply = tokio::time::timeout(timeout, self.exchange(&body))
            .await
            .context("LLM request timed out")??;

        let content = reply
            .choices
            .into_iter()
            .next()
            .context("LLM response has no choices")?
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .context("LLM returned an empty message")?;

        let usage = reply.usage.map(UsageMetadata::from).unwrap_or_default();
        tracing::debug!(
            model = %self.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            json = body.response_format.is_some(),
            "LLM completion"
        );

        Ok(LlmResponse {
            content,
            usage,
            model: reply.model.unwrap_or_else(|| self.model.clone()),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

impl From<TokenUsage> for UsageMetadata {
    fn from(u: TokenUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}
