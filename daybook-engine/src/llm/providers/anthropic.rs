//! Anthropic messages API adapter
//!
//! System messages travel in the top-level `system` field; everything else
//! goes in `messages`.

use super::{error_for_status, http_client, AdapterResponse, ProviderAdapter, DEFAULT_MAX_OUTPUT_TOKENS};
use crate::llm::types::{LlmRequest, Role};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn build_body(request: &LlmRequest) -> MessagesRequest<'_> {
        let mut system: Option<String> = None;
        let mut messages = Vec::new();

        for msg in &request.messages {
            match msg.role {
                Role::System => match system.as_mut() {
                    Some(existing) => {
                        existing.push_str("\n\n");
                        existing.push_str(&msg.content);
                    }
                    None => system = Some(msg.content.clone()),
                },
                Role::User | Role::Assistant => messages.push(AnthropicMessage {
                    role: msg.role.as_str(),
                    content: &msg.content,
                }),
            }
        }

        MessagesRequest {
            model: &request.model,
            max_tokens: request.max_output_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            system,
            messages,
            temperature: request.temperature,
        }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> &str {
        "anthropic"
    }

    async fn call(&self, request: &LlmRequest, api_key: &str) -> anyhow::Result<AdapterResponse> {
        debug!(provider = "anthropic", model = %request.model, "Invoking messages API");

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&Self::build_body(request))
            .send()
            .await
            .context("anthropic request failed")?;
        let response = error_for_status("anthropic", response).await?;

        let raw: serde_json::Value = response
            .json()
            .await
            .context("anthropic response was not JSON")?;
        let parsed: MessagesResponse =
            serde_json::from_value(raw.clone()).context("unexpected anthropic response shape")?;

        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();
        if text.is_empty() {
            anyhow::bail!("anthropic response missing text content");
        }
        let usage = parsed.usage.unwrap_or_default();

        Ok(AdapterResponse {
            text,
            tokens_in: usage.input_tokens,
            tokens_out: usage.output_tokens,
            raw,
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}
