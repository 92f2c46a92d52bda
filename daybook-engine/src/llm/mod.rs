//! LLM call governance
//!
//! Everything an outbound model call passes through: spacing (`RateLimiter`),
//! spend caps (`BudgetGuard`), pricing (`PricingBook`) and dispatch (`LlmClient`).
//! Limiter and guard are plain values constructed per execution scope; nothing
//! here is a process-wide singleton.

pub mod budget;
pub mod client;
pub mod pricing;
pub mod providers;
pub mod rate_limiter;
pub mod types;

pub use budget::{assert_within_budget, BudgetGuard, BudgetPolicy};
pub use client::{LlmClient, LlmMode, DRY_RUN_CLASSIFY_CONFIDENCE};
pub use pricing::{estimate_tokens, ModelRate, PricingBook, STUB_MODEL_PREFIX};
pub use providers::{AdapterResponse, ProviderAdapter};
pub use rate_limiter::RateLimiter;
pub use types::{CallPurpose, LlmRequest, LlmResponse, Message, Role};
