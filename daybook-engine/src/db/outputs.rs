//! Stage outputs

use super::{now_ts, parse_ts};
use crate::models::Output;
use daybook_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// Output fields produced by a job execution
#[derive(Debug, Clone)]
pub struct NewOutput {
    pub stage: String,
    pub output_text: String,
    pub output_json: serde_json::Value,
    pub model: String,
    pub prompt_version_id: String,
    pub bundle_hash: String,
    pub bundle_context_hash: String,
}

fn row_to_output(row: &SqliteRow) -> Result<Output> {
    let output_json: String = row.get("output_json");
    let created_at: String = row.get("created_at");
    Ok(Output {
        id: row.get("id"),
        job_id: row.get("job_id"),
        stage: row.get("stage"),
        output_text: row.get("output_text"),
        output_json: serde_json::from_str(&output_json)
            .map_err(|e| Error::Internal(format!("Failed to deserialize output_json: {}", e)))?,
        model: row.get("model"),
        prompt_version_id: row.get("prompt_version_id"),
        bundle_hash: row.get("bundle_hash"),
        bundle_context_hash: row.get("bundle_context_hash"),
        created_at: parse_ts(&created_at)?,
    })
}

pub(crate) async fn insert_output(
    tx: &mut Transaction<'_, Sqlite>,
    job_id: &str,
    output: &NewOutput,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO outputs (id, job_id, stage, output_text, output_json, model, prompt_version_id,
                             bundle_hash, bundle_context_hash, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(job_id)
    .bind(&output.stage)
    .bind(&output.output_text)
    .bind(output.output_json.to_string())
    .bind(&output.model)
    .bind(&output.prompt_version_id)
    .bind(&output.bundle_hash)
    .bind(&output.bundle_context_hash)
    .bind(now_ts())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn get_output(pool: &SqlitePool, job_id: &str, stage: &str) -> Result<Option<Output>> {
    let row = sqlx::query(
        r#"
        SELECT id, job_id, stage, output_text, output_json, model, prompt_version_id,
               bundle_hash, bundle_context_hash, created_at
        FROM outputs WHERE job_id = ? AND stage = ?
        "#,
    )
    .bind(job_id)
    .bind(stage)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_output).transpose()
}

pub async fn count_outputs_for_run(pool: &SqlitePool, run_id: &str) -> Result<u64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM outputs o JOIN jobs j ON j.id = o.job_id WHERE j.run_id = ?",
    )
    .bind(run_id)
    .fetch_one(pool)
    .await?;
    Ok(count as u64)
}
