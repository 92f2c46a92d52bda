//! Database Test Utilities
//!
//! Temporary databases and seed data for engine tests

use anyhow::Result;
use daybook_engine::db::atoms::{create_batch, insert_atoms};
use daybook_engine::models::{
    FilterMode, FilterProfile, LabelSpec, NewAtom, PromptVersionIds, RunConfig,
};
use daybook_engine::EngineSettings;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Create temporary test database with the full schema and seed prompts
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_daybook.db");
    let pool = daybook_common::db::init_database(&db_path).await?;
    Ok((temp_dir, pool))
}

/// `count` atoms for one day and source, alternating user/assistant, one minute apart
pub fn make_atoms(day: &str, source: &str, count: usize) -> Vec<NewAtom> {
    (0..count)
        .map(|i| NewAtom {
            source: source.to_string(),
            role: if i % 2 == 0 { "user" } else { "assistant" }.to_string(),
            text: format!("{} message {} on {}", source, i, day),
            timestamp: format!("{}T{:02}:{:02}:00Z", day, 8 + i / 60, i % 60),
            day_date: day.to_string(),
        })
        .collect()
}

/// Create a batch holding the given atoms; returns its id
pub async fn seed_batch(pool: &SqlitePool, atoms: &[NewAtom]) -> Result<String> {
    let batch = create_batch(pool, "chatgpt_export", Some("conversations.json")).await?;
    insert_atoms(pool, &batch.id, atoms).await?;
    Ok(batch.id)
}

/// Frozen run config over the given sources with an exclude-nothing filter
pub fn run_config(provider: &str, model: &str, sources: &[&str]) -> RunConfig {
    RunConfig {
        provider: provider.to_string(),
        model: model.to_string(),
        sources: sources.iter().map(|s| s.to_string()).collect(),
        label_spec: LabelSpec {
            model: "stub-classifier".to_string(),
            prompt_version_id: daybook_common::db::STUB_CLASSIFY_PROMPT_VERSION.to_string(),
        },
        filter_profile: FilterProfile {
            name: "everything".to_string(),
            mode: FilterMode::Exclude,
            categories: Vec::new(),
        },
        prompt_version_ids: PromptVersionIds {
            summarize: daybook_common::db::DEFAULT_SUMMARIZE_PROMPT_VERSION.to_string(),
        },
        timezone: "UTC".to_string(),
        max_input_tokens: 100_000,
    }
}

/// Settings with no rate-limit spacing and no caps
pub fn test_settings() -> EngineSettings {
    EngineSettings {
        min_delay_ms: 0,
        ..EngineSettings::default()
    }
}
