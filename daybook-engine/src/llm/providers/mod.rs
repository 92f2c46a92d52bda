//! Provider adapters
//!
//! An adapter turns an `LlmRequest` into one HTTP call against a vendor API and
//! reports the text plus the vendor's own token counts. Adapters own their
//! timeouts; the client wraps any adapter failure into a provider error.

pub mod anthropic;
pub mod openai;

use super::types::LlmRequest;
use async_trait::async_trait;
use std::time::Duration;

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiAdapter;

/// Per-request timeout for the built-in HTTP adapters
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Output tokens requested when the caller sets no limit (Anthropic requires one)
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;

/// Raw adapter result before pricing
#[derive(Debug, Clone)]
pub struct AdapterResponse {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider id this adapter serves (e.g. "openai")
    fn provider(&self) -> &str;

    async fn call(&self, request: &LlmRequest, api_key: &str) -> anyhow::Result<AdapterResponse>;
}

pub(crate) fn http_client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(DEFAULT_HTTP_TIMEOUT)
        .user_agent(concat!("daybook-engine/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Turn a non-2xx response into an error carrying status and body
pub(crate) async fn error_for_status(
    provider: &str,
    response: reqwest::Response,
) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("{} returned HTTP {}: {}", provider, status, body)
}
