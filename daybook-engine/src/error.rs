//! Error types for daybook-engine
//!
//! Every caller-visible failure carries a stable code (`EngineError::code`) and a
//! human message. Audit rows store the capped form from `to_error_json`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

/// Maximum characters of the message kept in an audit payload
pub const ERROR_MESSAGE_CAP: usize = 500;

/// Maximum characters of serialized details kept in an audit payload
pub const ERROR_DETAILS_CAP: usize = 2000;

/// Maximum characters of raw model output carried by `LlmBadOutput`
pub const RAW_OUTPUT_CAP: usize = 1000;

/// Marker appended to truncated text
pub const TRUNCATION_MARKER: &str = "…[truncated]";

/// Which spend cap a budget check tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    PerRun,
    PerDay,
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitType::PerRun => write!(f, "per_run"),
            LimitType::PerDay => write!(f, "per_day"),
        }
    }
}

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// No credential for a provider in real mode
    #[error("No API key configured for provider '{provider}'")]
    MissingApiKey { provider: String },

    /// No adapter registered for a provider
    #[error("Provider '{provider}' is not implemented")]
    ProviderNotImplemented { provider: String },

    /// Any failure raised by a provider adapter
    #[error("Provider '{provider}' call failed: {message}")]
    Provider { provider: String, message: String },

    /// A call would breach a spend cap
    #[error(
        "Budget exceeded ({limit_type}): spent ${spent_usd:.6} + next ${next_cost_usd:.6} > limit ${limit_usd:.6}"
    )]
    BudgetExceeded {
        limit_type: LimitType,
        limit_usd: f64,
        spent_usd: f64,
        next_cost_usd: f64,
    },

    /// Model output could not be parsed or validated
    #[error("Model returned unusable output: {reason}")]
    LlmBadOutput { reason: String, raw_output: String },

    /// No rate table entry for provider/model
    #[error("No pricing known for {provider}/{model}")]
    UnknownModelPricing { provider: String, model: String },

    /// Another tick holds the run's advisory lock
    #[error("A tick is already in progress for run {run_id}")]
    TickInProgress { run_id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Run {run_id} is already completed")]
    AlreadyCompleted { run_id: String },

    #[error("Run {run_id} is cancelled and cannot be resumed")]
    CannotResumeCancelled { run_id: String },

    #[error("Run {run_id} is cancelled; its jobs cannot be reset")]
    CannotResetCancelled { run_id: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

impl From<daybook_common::Error> for EngineError {
    fn from(err: daybook_common::Error) -> Self {
        match err {
            daybook_common::Error::Database(e) => EngineError::Database(e),
            daybook_common::Error::NotFound(msg) => EngineError::NotFound(msg),
            daybook_common::Error::InvalidInput(msg) => EngineError::InvalidInput(msg),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(format!("JSON error: {}", err))
    }
}

impl EngineError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::MissingApiKey { .. } => "MISSING_API_KEY",
            EngineError::ProviderNotImplemented { .. } => "PROVIDER_NOT_IMPLEMENTED",
            EngineError::Provider { .. } => "LLM_PROVIDER_ERROR",
            EngineError::BudgetExceeded { .. } => "BUDGET_EXCEEDED",
            EngineError::LlmBadOutput { .. } => "LLM_BAD_OUTPUT",
            EngineError::UnknownModelPricing { .. } => "UNKNOWN_MODEL_PRICING",
            EngineError::TickInProgress { .. } => "TICK_IN_PROGRESS",
            EngineError::InvalidInput(_) => "INVALID_INPUT",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::AlreadyCompleted { .. } => "ALREADY_COMPLETED",
            EngineError::CannotResumeCancelled { .. } => "CANNOT_RESUME_CANCELLED",
            EngineError::CannotResetCancelled { .. } => "CANNOT_RESET_CANCELLED",
            EngineError::Database(_) => "DATABASE_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Structured context for the audit payload
    pub fn details(&self) -> Option<Value> {
        match self {
            EngineError::MissingApiKey { provider }
            | EngineError::ProviderNotImplemented { provider } => {
                Some(json!({ "provider": provider }))
            }
            EngineError::Provider { provider, message } => {
                Some(json!({ "provider": provider, "providerMessage": message }))
            }
            EngineError::BudgetExceeded {
                limit_type,
                limit_usd,
                spent_usd,
                next_cost_usd,
            } => Some(json!({
                "limitType": limit_type,
                "limitUsd": limit_usd,
                "spentUsd": spent_usd,
                "nextCostUsd": next_cost_usd,
            })),
            EngineError::LlmBadOutput { raw_output, .. } => {
                Some(json!({ "rawOutput": raw_output }))
            }
            EngineError::UnknownModelPricing { provider, model } => {
                Some(json!({ "provider": provider, "model": model }))
            }
            EngineError::TickInProgress { run_id }
            | EngineError::AlreadyCompleted { run_id }
            | EngineError::CannotResumeCancelled { run_id }
            | EngineError::CannotResetCancelled { run_id } => Some(json!({ "runId": run_id })),
            EngineError::InvalidInput(_)
            | EngineError::NotFound(_)
            | EngineError::Database(_)
            | EngineError::Internal(_) => None,
        }
    }

    /// Recoverable per-atom failure during classification
    pub fn is_bad_output(&self) -> bool {
        matches!(self, EngineError::LlmBadOutput { .. })
    }

    /// Build a bad-output error, capping the raw model text
    pub fn bad_output(reason: impl Into<String>, raw_output: &str) -> Self {
        EngineError::LlmBadOutput {
            reason: reason.into(),
            raw_output: cap_chars(raw_output, RAW_OUTPUT_CAP),
        }
    }

    /// Size-capped `{code, message, details}` payload for audit rows
    pub fn to_error_json(&self) -> Value {
        let mut payload = json!({
            "code": self.code(),
            "message": cap_chars(&self.to_string(), ERROR_MESSAGE_CAP),
        });

        if let Some(details) = self.details() {
            let serialized = details.to_string();
            payload["details"] = if serialized.chars().count() > ERROR_DETAILS_CAP {
                Value::String(cap_chars(&serialized, ERROR_DETAILS_CAP))
            } else {
                details
            };
        }

        payload
    }
}

/// Keep at most `max` characters, appending the truncation marker when cut
pub fn cap_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut capped: String = text.chars().take(max).collect();
    capped.push_str(TRUNCATION_MARKER);
    capped
}
