//! LLM client: dry-run synthesis or real dispatch to a provider adapter

use super::pricing::{estimate_tokens, PricingBook};
use super::providers::{
    AdapterResponse, AnthropicAdapter, OpenAiAdapter, ProviderAdapter, DEFAULT_MAX_OUTPUT_TOKENS,
};
use super::types::{CallPurpose, LlmRequest, LlmResponse};
use crate::config::ApiKeys;
use crate::error::{EngineError, EngineResult};
use crate::models::Category;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Confidence reported by synthesized dry-run classifications
pub const DRY_RUN_CLASSIFY_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmMode {
    /// Deterministic local responses, zero cost, no credentials needed
    #[default]
    DryRun,
    Real,
}

impl fmt::Display for LlmMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmMode::DryRun => write!(f, "dry_run"),
            LlmMode::Real => write!(f, "real"),
        }
    }
}

impl FromStr for LlmMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dry_run" | "dry-run" | "dryrun" => Ok(LlmMode::DryRun),
            "real" => Ok(LlmMode::Real),
            other => Err(format!(
                "unknown LLM mode '{}' (expected dry_run or real)",
                other
            )),
        }
    }
}

pub struct LlmClient {
    mode: LlmMode,
    pricing: PricingBook,
    api_keys: ApiKeys,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl LlmClient {
    pub fn new(mode: LlmMode, pricing: PricingBook, api_keys: ApiKeys) -> Self {
        Self {
            mode,
            pricing,
            api_keys,
            adapters: HashMap::new(),
        }
    }

    /// Dry-run client with the built-in rate table and no credentials
    pub fn dry_run() -> Self {
        Self::new(LlmMode::DryRun, PricingBook::builtin(), ApiKeys::empty())
    }

    /// Register the HTTP adapters for openai and anthropic
    pub fn with_builtin_adapters(self) -> EngineResult<Self> {
        let openai = OpenAiAdapter::new()
            .map_err(|e| EngineError::Internal(format!("openai adapter: {:#}", e)))?;
        let anthropic = AnthropicAdapter::new()
            .map_err(|e| EngineError::Internal(format!("anthropic adapter: {:#}", e)))?;
        Ok(self
            .with_adapter(Arc::new(openai))
            .with_adapter(Arc::new(anthropic)))
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.provider().to_string(), adapter);
        self
    }

    pub fn mode(&self) -> LlmMode {
        self.mode
    }

    pub fn is_dry_run(&self) -> bool {
        self.mode == LlmMode::DryRun
    }

    pub fn pricing(&self) -> &PricingBook {
        &self.pricing
    }

    /// Real-mode precondition: a credential and an adapter exist for `provider`
    ///
    /// The credential is checked first so a missing key is reported even for
    /// providers without an adapter.
    pub fn ensure_ready(&self, provider: &str) -> EngineResult<()> {
        if self.is_dry_run() {
            return Ok(());
        }
        self.api_key(provider)?;
        self.adapter(provider)?;
        Ok(())
    }

    /// Upper-bound cost of a request before it is sent: estimated input tokens
    /// plus the full output allowance. Dry-run calls cost nothing.
    pub fn estimate_call_cost(&self, request: &LlmRequest) -> EngineResult<f64> {
        if self.is_dry_run() {
            return Ok(0.0);
        }
        let tokens_in = estimate_tokens(&request.input_text());
        let tokens_out = request
            .max_output_tokens
            .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS) as u64;
        self.pricing
            .estimate_cost(&request.provider, &request.model, tokens_in, tokens_out, 0)
    }

    pub async fn call(&self, request: &LlmRequest) -> EngineResult<LlmResponse> {
        match self.mode {
            LlmMode::DryRun => Ok(self.dry_run_response(request)),
            LlmMode::Real => self.real_call(request).await,
        }
    }

    fn dry_run_response(&self, request: &LlmRequest) -> LlmResponse {
        let input_text = request.input_text();
        let text = match &request.purpose {
            CallPurpose::Classify { stable_atom_id } => {
                let seed = stable_atom_id.as_deref().unwrap_or(&input_text);
                json!({
                    "category": Category::from_seed(seed),
                    "confidence": DRY_RUN_CLASSIFY_CONFIDENCE,
                })
                .to_string()
            }
            CallPurpose::General => format!(
                "[dry-run] provider={} model={} messages={}",
                request.provider,
                request.model,
                request.messages.len()
            ),
        };

        debug!(
            provider = %request.provider,
            model = %request.model,
            "Dry-run LLM response synthesized"
        );

        LlmResponse {
            tokens_in: estimate_tokens(&input_text),
            tokens_out: estimate_tokens(&text),
            text,
            provider: request.provider.clone(),
            model: request.model.clone(),
            cost_usd: 0.0,
            dry_run: true,
            raw: json!({ "dryRun": true }),
        }
    }

    async fn real_call(&self, request: &LlmRequest) -> EngineResult<LlmResponse> {
        let api_key = self.api_key(&request.provider)?;
        let adapter = self.adapter(&request.provider)?;

        let AdapterResponse {
            text,
            tokens_in,
            tokens_out,
            raw,
        } = adapter
            .call(request, api_key)
            .await
            .map_err(|e| EngineError::Provider {
                provider: request.provider.clone(),
                message: format!("{:#}", e),
            })?;

        let cost_usd = match self.pricing.estimate_cost(
            &request.provider,
            &request.model,
            tokens_in,
            tokens_out,
            0,
        ) {
            Ok(cost) => cost,
            Err(e) => {
                warn!(
                    provider = %request.provider,
                    model = %request.model,
                    "{}; recording zero cost",
                    e
                );
                0.0
            }
        };

        debug!(
            provider = %request.provider,
            model = %request.model,
            tokens_in,
            tokens_out,
            cost_usd,
            "LLM call completed"
        );

        Ok(LlmResponse {
            text,
            provider: request.provider.clone(),
            model: request.model.clone(),
            tokens_in,
            tokens_out,
            cost_usd,
            dry_run: false,
            raw,
        })
    }

    fn api_key(&self, provider: &str) -> EngineResult<&str> {
        self.api_keys
            .get(provider)
            .ok_or_else(|| EngineError::MissingApiKey {
                provider: provider.to_string(),
            })
    }

    fn adapter(&self, provider: &str) -> EngineResult<&Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(provider)
            .ok_or_else(|| EngineError::ProviderNotImplemented {
                provider: provider.to_string(),
            })
    }
}
