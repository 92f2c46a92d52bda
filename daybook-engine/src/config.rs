//! Configuration resolution for daybook-engine
//!
//! Engine tunables come from the TOML file with built-in defaults; the LLM mode
//! can be forced with `DAYBOOK_LLM_MODE`. API keys resolve per provider with
//! ENV → TOML priority.

use crate::error::{EngineError, EngineResult};
use crate::llm::{BudgetPolicy, LlmMode};
use daybook_common::config::TomlConfig;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// Environment override for the LLM mode
pub const LLM_MODE_ENV: &str = "DAYBOOK_LLM_MODE";

/// Providers whose conventional key variables are checked at startup
pub const KNOWN_PROVIDERS: &[&str] = &["openai", "anthropic", "gemini", "xai"];

pub const DEFAULT_MIN_DELAY_MS: u64 = 250;
pub const DEFAULT_LOCK_STALE_AFTER_SECS: u64 = 3600;
pub const DEFAULT_CLASSIFY_PAGE_SIZE: u32 = 200;
pub const DEFAULT_CHECKPOINT_EVERY_ATOMS: u64 = 100;
pub const DEFAULT_CHECKPOINT_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_SUMMARIZE_MAX_OUTPUT_TOKENS: u32 = 1024;

/// Resolved engine tunables
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub llm_mode: LlmMode,
    /// Minimum spacing between outbound model calls in one scope
    pub min_delay_ms: u64,
    /// Default caps; a classify request may override them
    pub budget: BudgetPolicy,
    pub lock_stale_after: Duration,
    pub classify_page_size: u32,
    pub checkpoint_every_atoms: u64,
    pub checkpoint_interval: Duration,
    pub summarize_max_output_tokens: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            llm_mode: LlmMode::DryRun,
            min_delay_ms: DEFAULT_MIN_DELAY_MS,
            budget: BudgetPolicy::unlimited(),
            lock_stale_after: Duration::from_secs(DEFAULT_LOCK_STALE_AFTER_SECS),
            classify_page_size: DEFAULT_CLASSIFY_PAGE_SIZE,
            checkpoint_every_atoms: DEFAULT_CHECKPOINT_EVERY_ATOMS,
            checkpoint_interval: Duration::from_millis(DEFAULT_CHECKPOINT_INTERVAL_MS),
            summarize_max_output_tokens: DEFAULT_SUMMARIZE_MAX_OUTPUT_TOKENS,
        }
    }
}

impl EngineSettings {
    /// Build settings from TOML, then apply the environment mode override
    pub fn from_toml(config: &TomlConfig) -> EngineResult<Self> {
        let defaults = Self::default();

        let toml_mode = config
            .llm
            .mode
            .as_deref()
            .map(str::parse::<LlmMode>)
            .transpose()
            .map_err(EngineError::InvalidInput)?;
        let env_mode = std::env::var(LLM_MODE_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.parse::<LlmMode>())
            .transpose()
            .map_err(EngineError::InvalidInput)?;

        let llm_mode = env_mode.or(toml_mode).unwrap_or(defaults.llm_mode);
        if env_mode.is_some() {
            info!("LLM mode {} set from {}", llm_mode, LLM_MODE_ENV);
        }

        let page_size = config
            .engine
            .classify_page_size
            .unwrap_or(defaults.classify_page_size);
        if page_size == 0 {
            return Err(EngineError::InvalidInput(
                "engine.classify_page_size must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            llm_mode,
            min_delay_ms: config.llm.min_delay_ms.unwrap_or(defaults.min_delay_ms),
            budget: BudgetPolicy {
                max_usd_per_run: config.budget.max_usd_per_run,
                max_usd_per_day: config.budget.max_usd_per_day,
            },
            lock_stale_after: config
                .engine
                .lock_stale_after_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_stale_after),
            classify_page_size: page_size,
            checkpoint_every_atoms: config
                .engine
                .checkpoint_every_atoms
                .unwrap_or(defaults.checkpoint_every_atoms),
            checkpoint_interval: config
                .engine
                .checkpoint_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.checkpoint_interval),
            summarize_max_output_tokens: config
                .engine
                .summarize_max_output_tokens
                .unwrap_or(defaults.summarize_max_output_tokens),
        })
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Environment variables consulted for a provider, in priority order
pub fn api_key_env_vars(provider: &str) -> Vec<String> {
    let upper = provider.to_uppercase().replace('-', "_");
    vec![
        format!("DAYBOOK_{}_API_KEY", upper),
        format!("{}_API_KEY", upper),
    ]
}

/// Per-provider credentials
#[derive(Clone, Default)]
pub struct ApiKeys {
    keys: BTreeMap<String, String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("providers", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ApiKeys {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolve keys for every known provider plus any listed in `[api_keys]`
    ///
    /// **Priority:** ENV → TOML
    pub fn resolve(toml_config: &TomlConfig) -> Self {
        let mut providers: Vec<String> = KNOWN_PROVIDERS.iter().map(|p| p.to_string()).collect();
        for provider in toml_config.api_keys.keys() {
            if !providers.contains(provider) {
                providers.push(provider.clone());
            }
        }

        let mut keys = BTreeMap::new();
        for provider in providers {
            if let Some(key) = resolve_api_key(&provider, toml_config) {
                keys.insert(provider, key);
            }
        }
        Self { keys }
    }

    pub fn with_key(mut self, provider: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys.insert(provider.into(), key.into());
        self
    }

    /// Valid key for a provider, if one was configured
    pub fn get(&self, provider: &str) -> Option<&str> {
        self.keys
            .get(provider)
            .map(String::as_str)
            .filter(|k| is_valid_key(k))
    }
}

/// Resolve one provider's API key from ENV, then TOML
fn resolve_api_key(provider: &str, toml_config: &TomlConfig) -> Option<String> {
    let env_key = api_key_env_vars(provider)
        .into_iter()
        .find_map(|var| std::env::var(&var).ok().filter(|k| is_valid_key(k)));
    let toml_key = toml_config
        .api_keys
        .get(provider)
        .filter(|k| is_valid_key(k))
        .cloned();

    if env_key.is_some() && toml_key.is_some() {
        warn!(
            "{} API key found in environment and TOML. Using environment (highest priority).",
            provider
        );
    }

    if let Some(key) = env_key {
        info!("{} API key loaded from environment variable", provider);
        return Some(key);
    }
    if let Some(key) = toml_key {
        info!("{} API key loaded from TOML config", provider);
        return Some(key);
    }
    None
}
