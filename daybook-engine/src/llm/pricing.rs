//! Model rate table and cost estimation
//!
//! Rates are USD per million tokens. Models whose name starts with `stub`
//! are free regardless of provider.

use crate::error::{EngineError, EngineResult};
use daybook_common::config::PricingOverride;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Model-name prefix that is always priced at zero
pub const STUB_MODEL_PREFIX: &str = "stub";

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRate {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cached_input_per_million: Option<f64>,
}

impl ModelRate {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
            cached_input_per_million: None,
        }
    }

    pub const fn with_cached(mut self, cached_input_per_million: f64) -> Self {
        self.cached_input_per_million = Some(cached_input_per_million);
        self
    }

    /// Linear cost; cached tokens fall back to the input rate when no cached rate exists
    pub fn cost(&self, tokens_in: u64, tokens_out: u64, cached_tokens: u64) -> f64 {
        let cached_rate = self
            .cached_input_per_million
            .unwrap_or(self.input_per_million);
        (tokens_in as f64 / TOKENS_PER_UNIT) * self.input_per_million
            + (tokens_out as f64 / TOKENS_PER_UNIT) * self.output_per_million
            + (cached_tokens as f64 / TOKENS_PER_UNIT) * cached_rate
    }
}

impl From<&PricingOverride> for ModelRate {
    fn from(o: &PricingOverride) -> Self {
        Self {
            input_per_million: o.input,
            output_per_million: o.output,
            cached_input_per_million: o.cached_input,
        }
    }
}

const BUILTIN_RATES: &[(&str, &str, ModelRate)] = &[
    ("openai", "gpt-4o", ModelRate::new(2.50, 10.00).with_cached(1.25)),
    ("openai", "gpt-4o-mini", ModelRate::new(0.15, 0.60).with_cached(0.075)),
    ("openai", "gpt-4.1", ModelRate::new(2.00, 8.00).with_cached(0.50)),
    ("openai", "gpt-4.1-mini", ModelRate::new(0.40, 1.60).with_cached(0.10)),
    ("anthropic", "claude-3-5-sonnet-latest", ModelRate::new(3.00, 15.00)),
    ("anthropic", "claude-3-5-haiku-latest", ModelRate::new(0.80, 4.00)),
    ("anthropic", "claude-sonnet-4-20250514", ModelRate::new(3.00, 15.00)),
    ("gemini", "gemini-2.0-flash", ModelRate::new(0.10, 0.40)),
    ("xai", "grok-3-mini", ModelRate::new(0.30, 0.50)),
];

/// Provider/model rate lookup
#[derive(Debug, Clone, Default)]
pub struct PricingBook {
    rates: HashMap<(String, String), ModelRate>,
}

impl PricingBook {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut book = Self::empty();
        for (provider, model, rate) in BUILTIN_RATES {
            book.set_rate(provider, model, *rate);
        }
        book
    }

    pub fn with_rate(mut self, provider: &str, model: &str, rate: ModelRate) -> Self {
        self.set_rate(provider, model, rate);
        self
    }

    pub fn set_rate(&mut self, provider: &str, model: &str, rate: ModelRate) {
        self.rates
            .insert((provider.to_string(), model.to_string()), rate);
    }

    /// Apply `[pricing."provider/model"]` entries from the TOML config
    pub fn apply_overrides(
        &mut self,
        overrides: &BTreeMap<String, PricingOverride>,
    ) -> EngineResult<()> {
        for (key, entry) in overrides {
            let (provider, model) = key.split_once('/').ok_or_else(|| {
                EngineError::InvalidInput(format!(
                    "pricing key '{}' must have the form provider/model",
                    key
                ))
            })?;
            if provider.is_empty() || model.is_empty() {
                return Err(EngineError::InvalidInput(format!(
                    "pricing key '{}' must have the form provider/model",
                    key
                )));
            }
            self.set_rate(provider, model, ModelRate::from(entry));
        }
        Ok(())
    }

    pub fn rate(&self, provider: &str, model: &str) -> Option<&ModelRate> {
        self.rates.get(&(provider.to_string(), model.to_string()))
    }

    pub fn is_stub_model(model: &str) -> bool {
        model.starts_with(STUB_MODEL_PREFIX)
    }

    /// Cost of a call, or `UnknownModelPricing` when no rate exists
    pub fn estimate_cost(
        &self,
        provider: &str,
        model: &str,
        tokens_in: u64,
        tokens_out: u64,
        cached_tokens: u64,
    ) -> EngineResult<f64> {
        if Self::is_stub_model(model) {
            return Ok(0.0);
        }
        self.rate(provider, model)
            .map(|rate| rate.cost(tokens_in, tokens_out, cached_tokens))
            .ok_or_else(|| EngineError::UnknownModelPricing {
                provider: provider.to_string(),
                model: model.to_string(),
            })
    }
}

/// Rough token count: one token per four characters, rounded up
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}
