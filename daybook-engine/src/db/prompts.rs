//! Prompt version lookups

use crate::models::PromptVersion;
use daybook_common::Result;
use sqlx::{Row, SqlitePool};

pub async fn get_prompt_version(pool: &SqlitePool, id: &str) -> Result<Option<PromptVersion>> {
    let row = sqlx::query("SELECT id, stage, template_text FROM prompt_versions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|row| PromptVersion {
        id: row.get("id"),
        stage: row.get("stage"),
        template_text: row.get("template_text"),
    }))
}

/// Register a new prompt version; ids are immutable once written
pub async fn insert_prompt_version(
    pool: &SqlitePool,
    id: &str,
    stage: &str,
    template_text: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO prompt_versions (id, stage, template_text, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(id)
    .bind(stage)
    .bind(template_text)
    .bind(super::now_ts())
    .execute(pool)
    .await?;
    Ok(())
}
