//! OpenAI chat completions adapter

use super::{error_for_status, http_client, AdapterResponse, ProviderAdapter};
use crate::llm::types::LlmRequest;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn build_body(request: &LlmRequest) -> ChatRequest<'_> {
        ChatRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: request.max_output_tokens,
            temperature: request.temperature,
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> &str {
        "openai"
    }

    async fn call(&self, request: &LlmRequest, api_key: &str) -> anyhow::Result<AdapterResponse> {
        debug!(provider = "openai", model = %request.model, "Invoking chat completions");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&Self::build_body(request))
            .send()
            .await
            .context("openai request failed")?;
        let response = error_for_status("openai", response).await?;

        let raw: serde_json::Value = response
            .json()
            .await
            .context("openai response was not JSON")?;
        let parsed: ChatResponse =
            serde_json::from_value(raw.clone()).context("unexpected openai response shape")?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("openai response had no message content")?;
        let usage = parsed.usage.unwrap_or_default();

        Ok(AdapterResponse {
            text,
            tokens_in: usage.prompt_tokens,
            tokens_out: usage.completion_tokens,
            raw,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
