//! Run persistence and whole-run control transitions

use super::{now_ts, parse_column, parse_opt_ts, parse_ts};
use crate::models::{JobStatus, Run, RunConfig, RunStatus};
use daybook_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use uuid::Uuid;

fn row_to_run(row: &SqliteRow) -> Result<Run> {
    let status: String = row.get("status");
    let config_json: String = row.get("config_json");
    let config: RunConfig = serde_json::from_str(&config_json)
        .map_err(|e| Error::Internal(format!("Failed to deserialize run config: {}", e)))?;
    let created_at: String = row.get("created_at");

    Ok(Run {
        id: row.get("id"),
        import_batch_id: row.get("import_batch_id"),
        status: parse_column(&status)?,
        config,
        tokens_in: row.get::<i64, _>("tokens_in") as u64,
        tokens_out: row.get::<i64, _>("tokens_out") as u64,
        cost_usd: row.get("cost_usd"),
        created_at: parse_ts(&created_at)?,
        started_at: parse_opt_ts(row.get("started_at"))?,
        finished_at: parse_opt_ts(row.get("finished_at"))?,
    })
}

/// Create a QUEUED run with one QUEUED job per distinct day
pub async fn create_run(
    pool: &SqlitePool,
    import_batch_id: &str,
    config: &RunConfig,
    days: &[String],
) -> Result<Run> {
    let days: BTreeSet<&String> = days.iter().collect();
    if days.is_empty() {
        return Err(Error::InvalidInput("a run needs at least one day".to_string()));
    }

    let run_id = Uuid::new_v4().to_string();
    let config_json = serde_json::to_string(config)
        .map_err(|e| Error::Internal(format!("Failed to serialize run config: {}", e)))?;
    let created_at = now_ts();

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO runs (id, import_batch_id, status, config_json, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&run_id)
    .bind(import_batch_id)
    .bind(RunStatus::Queued.as_str())
    .bind(&config_json)
    .bind(&created_at)
    .execute(&mut *tx)
    .await?;

    for day in days {
        sqlx::query("INSERT INTO jobs (id, run_id, day_date, status) VALUES (?, ?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(&run_id)
            .bind(day.as_str())
            .bind(JobStatus::Queued.as_str())
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    get_run(pool, &run_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("run {} vanished after insert", run_id)))
}

pub async fn get_run(pool: &SqlitePool, run_id: &str) -> Result<Option<Run>> {
    let row = sqlx::query(
        r#"
        SELECT id, import_batch_id, status, config_json, tokens_in, tokens_out, cost_usd,
               created_at, started_at, finished_at
        FROM runs WHERE id = ?
        "#,
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_run).transpose()
}

pub async fn get_run_status(pool: &SqlitePool, run_id: &str) -> Result<Option<RunStatus>> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM runs WHERE id = ?")
        .bind(run_id)
        .fetch_optional(pool)
        .await?;
    status.as_deref().map(parse_column).transpose()
}

/// RUNNING; `started_at` keeps its first value
pub async fn mark_run_running(pool: &SqlitePool, run_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE runs SET status = ?, started_at = COALESCE(started_at, ?), finished_at = NULL
        WHERE id = ? AND status NOT IN ('COMPLETED', 'CANCELLED')
        "#,
    )
    .bind(RunStatus::Running.as_str())
    .bind(now_ts())
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Set an aggregate status. Terminal statuses stamp `finished_at`.
/// A CANCELLED run is never overwritten.
pub async fn set_run_status(pool: &SqlitePool, run_id: &str, status: RunStatus) -> Result<()> {
    let finished_at = match status {
        RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled => Some(now_ts()),
        RunStatus::Queued | RunStatus::Running => None,
    };
    sqlx::query(
        "UPDATE runs SET status = ?, finished_at = ? WHERE id = ? AND status != 'CANCELLED'",
    )
    .bind(status.as_str())
    .bind(finished_at)
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Recompute run tokens and cost from its jobs
pub async fn refresh_run_totals(pool: &SqlitePool, run_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE runs SET
            tokens_in = (SELECT COALESCE(SUM(tokens_in), 0) FROM jobs WHERE run_id = ?),
            tokens_out = (SELECT COALESCE(SUM(tokens_out), 0) FROM jobs WHERE run_id = ?),
            cost_usd = (SELECT COALESCE(SUM(cost_usd), 0.0) FROM jobs WHERE run_id = ?)
        WHERE id = ?
        "#,
    )
    .bind(run_id)
    .bind(run_id)
    .bind(run_id)
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Requeue FAILED jobs and, if any were requeued, the run. Returns jobs requeued.
pub async fn requeue_failed_jobs(pool: &SqlitePool, run_id: &str) -> Result<u64> {
    let mut tx = pool.begin().await?;

    let requeued = sqlx::query(
        r#"
        UPDATE jobs SET status = 'QUEUED', error = NULL, started_at = NULL, finished_at = NULL
        WHERE run_id = ? AND status = 'FAILED'
        "#,
    )
    .bind(run_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if requeued > 0 {
        sqlx::query(
            "UPDATE runs SET status = 'QUEUED', finished_at = NULL WHERE id = ? AND status != 'CANCELLED'",
        )
        .bind(run_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(requeued)
}

/// Cancel the run and every QUEUED/RUNNING job. Returns jobs cancelled.
pub async fn cancel_run(pool: &SqlitePool, run_id: &str) -> Result<u64> {
    let finished_at = now_ts();
    let mut tx = pool.begin().await?;

    let cancelled = sqlx::query(
        r#"
        UPDATE jobs SET status = 'CANCELLED', finished_at = ?
        WHERE run_id = ? AND status IN ('QUEUED', 'RUNNING')
        "#,
    )
    .bind(&finished_at)
    .bind(run_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    sqlx::query("UPDATE runs SET status = 'CANCELLED', finished_at = ? WHERE id = ?")
        .bind(&finished_at)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(cancelled)
}

/// Requeue the run, delete the job's outputs and bump its attempt.
/// Returns (new attempt, outputs deleted), or `None` without touching
/// anything if the run is CANCELLED when the transaction starts writing.
pub async fn reset_job(
    pool: &SqlitePool,
    run_id: &str,
    job_id: &str,
) -> Result<Option<(u32, u64)>> {
    let mut tx = pool.begin().await?;

    // First write takes the database write lock, so a concurrent cancel either
    // committed already (and is seen here) or waits for this transaction
    let requeued = sqlx::query(
        "UPDATE runs SET status = 'QUEUED', finished_at = NULL WHERE id = ? AND status != 'CANCELLED'",
    )
    .bind(run_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if requeued == 0 {
        tx.rollback().await?;
        return Ok(None);
    }

    let outputs_deleted = sqlx::query("DELETE FROM outputs WHERE job_id = ?")
        .bind(job_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    sqlx::query(
        r#"
        UPDATE jobs SET
            status = 'QUEUED', attempt = attempt + 1, error = NULL,
            tokens_in = 0, tokens_out = 0, cost_usd = 0.0,
            started_at = NULL, finished_at = NULL
        WHERE id = ?
        "#,
    )
    .bind(job_id)
    .execute(&mut *tx)
    .await?;

    let attempt: i64 = sqlx::query_scalar("SELECT attempt FROM jobs WHERE id = ?")
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Some((attempt as u32, outputs_deleted)))
}
