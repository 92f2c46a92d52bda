//! Classification audit rows
//!
//! Checkpoint and finalisation writes go through `retry_on_lock`: losing an
//! audit update to a transient lock would leave a stale row behind.

use super::{now_ts, parse_column, parse_opt_ts, parse_ts};
use crate::models::{ClassifyCounters, ClassifyMode, ClassifyRun, ClassifyStatus};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use daybook_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const CLASSIFY_RUN_COLUMNS: &str = "id, batch_id, model, prompt_version_id, mode, status, total_atoms, \
     processed_atoms, newly_labeled, skipped_already_labeled, skipped_bad_output, aliased_count, \
     labeled_total, tokens_in, tokens_out, cost_usd, last_atom_stable_id_processed, error_json, \
     started_at, finished_at";

fn row_to_classify_run(row: &SqliteRow) -> Result<ClassifyRun> {
    let mode: String = row.get("mode");
    let status: String = row.get("status");
    let started_at: String = row.get("started_at");
    let error_json: Option<String> = row.get("error_json");
    let count = |col: &str| row.get::<i64, _>(col) as u64;

    Ok(ClassifyRun {
        id: row.get("id"),
        batch_id: row.get("batch_id"),
        model: row.get("model"),
        prompt_version_id: row.get("prompt_version_id"),
        mode: parse_column(&mode)?,
        status: parse_column(&status)?,
        total_atoms: count("total_atoms"),
        counters: ClassifyCounters {
            processed_atoms: count("processed_atoms"),
            newly_labeled: count("newly_labeled"),
            skipped_already_labeled: count("skipped_already_labeled"),
            skipped_bad_output: count("skipped_bad_output"),
            aliased_count: count("aliased_count"),
            labeled_total: count("labeled_total"),
            tokens_in: count("tokens_in"),
            tokens_out: count("tokens_out"),
            cost_usd: row.get("cost_usd"),
            last_atom_stable_id_processed: row.get("last_atom_stable_id_processed"),
        },
        error_json: error_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| Error::Internal(format!("Failed to deserialize error_json: {}", e)))?,
        started_at: parse_ts(&started_at)?,
        finished_at: parse_opt_ts(row.get("finished_at"))?,
    })
}

/// Open a new audit row in `running` state
pub async fn create_classify_run(
    pool: &SqlitePool,
    batch_id: &str,
    model: &str,
    prompt_version_id: &str,
    mode: ClassifyMode,
    total_atoms: u64,
    already_labeled: u64,
) -> Result<ClassifyRun> {
    let id = Uuid::new_v4().to_string();

    sqlx::query(
        r#"
        INSERT INTO classify_runs (id, batch_id, model, prompt_version_id, mode, status,
                                   total_atoms, skipped_already_labeled, labeled_total, started_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(batch_id)
    .bind(model)
    .bind(prompt_version_id)
    .bind(mode.as_str())
    .bind(ClassifyStatus::Running.as_str())
    .bind(total_atoms as i64)
    .bind(already_labeled as i64)
    .bind(already_labeled as i64)
    .bind(now_ts())
    .execute(pool)
    .await?;

    get_classify_run(pool, &id)
        .await?
        .ok_or_else(|| Error::Internal(format!("classify run {} vanished after insert", id)))
}

/// Persist in-flight counters on a running row
pub async fn checkpoint_classify_run(
    pool: &SqlitePool,
    id: &str,
    counters: &ClassifyCounters,
) -> Result<()> {
    retry_on_lock("classify checkpoint", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            UPDATE classify_runs SET
                processed_atoms = ?, newly_labeled = ?, skipped_already_labeled = ?,
                skipped_bad_output = ?, aliased_count = ?, labeled_total = ?,
                tokens_in = ?, tokens_out = ?, cost_usd = ?, last_atom_stable_id_processed = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(counters.processed_atoms as i64)
        .bind(counters.newly_labeled as i64)
        .bind(counters.skipped_already_labeled as i64)
        .bind(counters.skipped_bad_output as i64)
        .bind(counters.aliased_count as i64)
        .bind(counters.labeled_total as i64)
        .bind(counters.tokens_in as i64)
        .bind(counters.tokens_out as i64)
        .bind(counters.cost_usd)
        .bind(&counters.last_atom_stable_id_processed)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Move a running row to `succeeded` or `failed` with its final counters.
/// Only a running row is updated, so finalisation happens at most once.
pub async fn finalize_classify_run(
    pool: &SqlitePool,
    id: &str,
    status: ClassifyStatus,
    counters: &ClassifyCounters,
    error_json: Option<&serde_json::Value>,
) -> Result<()> {
    let error_text = error_json.map(|v| v.to_string());
    let finished_at = now_ts();

    retry_on_lock("classify finalize", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            UPDATE classify_runs SET
                status = ?, processed_atoms = ?, newly_labeled = ?, skipped_already_labeled = ?,
                skipped_bad_output = ?, aliased_count = ?, labeled_total = ?,
                tokens_in = ?, tokens_out = ?, cost_usd = ?, last_atom_stable_id_processed = ?,
                error_json = ?, finished_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(counters.processed_atoms as i64)
        .bind(counters.newly_labeled as i64)
        .bind(counters.skipped_already_labeled as i64)
        .bind(counters.skipped_bad_output as i64)
        .bind(counters.aliased_count as i64)
        .bind(counters.labeled_total as i64)
        .bind(counters.tokens_in as i64)
        .bind(counters.tokens_out as i64)
        .bind(counters.cost_usd)
        .bind(&counters.last_atom_stable_id_processed)
        .bind(&error_text)
        .bind(&finished_at)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

pub async fn get_classify_run(pool: &SqlitePool, id: &str) -> Result<Option<ClassifyRun>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM classify_runs WHERE id = ?",
        CLASSIFY_RUN_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_classify_run).transpose()
}

/// Every audit row for a batch, oldest first
pub async fn list_classify_runs(pool: &SqlitePool, batch_id: &str) -> Result<Vec<ClassifyRun>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM classify_runs WHERE batch_id = ? ORDER BY started_at, rowid",
        CLASSIFY_RUN_COLUMNS
    ))
    .bind(batch_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_classify_run).collect()
}
