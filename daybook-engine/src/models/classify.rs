//! Classification audit records
//!
//! One `ClassifyRun` row per invocation. Counters live in `ClassifyCounters`
//! so the pipeline can checkpoint and finalise from the same snapshot.

use crate::llm::BudgetPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifyMode {
    /// Hash-derived labels, no model call
    Stub,
    /// Labels from the LLM client (which may itself be in dry-run mode)
    Real,
}

impl ClassifyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifyMode::Stub => "stub",
            ClassifyMode::Real => "real",
        }
    }
}

impl fmt::Display for ClassifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassifyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stub" => Ok(ClassifyMode::Stub),
            "real" => Ok(ClassifyMode::Real),
            other => Err(format!("unknown classify mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifyStatus {
    Running,
    Succeeded,
    Failed,
}

impl ClassifyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifyStatus::Running => "running",
            ClassifyStatus::Succeeded => "succeeded",
            ClassifyStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ClassifyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassifyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ClassifyStatus::Running),
            "succeeded" => Ok(ClassifyStatus::Succeeded),
            "failed" => Ok(ClassifyStatus::Failed),
            other => Err(format!("unknown classify status '{}'", other)),
        }
    }
}

/// Input to `Engine::classify_batch`
#[derive(Debug, Clone)]
pub struct ClassifyRequest {
    pub batch_id: String,
    pub provider: String,
    pub model: String,
    pub prompt_version_id: String,
    pub mode: ClassifyMode,
    /// Overrides the configured caps for this invocation when set
    pub budget: Option<BudgetPolicy>,
}

impl ClassifyRequest {
    pub fn stub(batch_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            provider: "stub".to_string(),
            model: model.into(),
            prompt_version_id: daybook_common::db::STUB_CLASSIFY_PROMPT_VERSION.to_string(),
            mode: ClassifyMode::Stub,
            budget: None,
        }
    }
}

/// Running counters persisted on checkpoint and finalisation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyCounters {
    pub processed_atoms: u64,
    pub newly_labeled: u64,
    pub skipped_already_labeled: u64,
    pub skipped_bad_output: u64,
    pub aliased_count: u64,
    pub labeled_total: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub last_atom_stable_id_processed: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyRun {
    pub id: String,
    pub batch_id: String,
    pub model: String,
    pub prompt_version_id: String,
    pub mode: ClassifyMode,
    pub status: ClassifyStatus,
    pub total_atoms: u64,
    #[serde(flatten)]
    pub counters: ClassifyCounters,
    pub error_json: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
