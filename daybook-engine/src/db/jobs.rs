//! Job persistence
//!
//! Per-job transitions are guarded by the expected current status in the
//! WHERE clause, so a job cancelled mid-tick is never flipped back.

use super::outputs::{insert_output, NewOutput};
use super::{now_ts, parse_column, parse_opt_ts};
use crate::models::{Job, JobStatus};
use daybook_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const JOB_COLUMNS: &str = "id, run_id, day_date, status, attempt, tokens_in, tokens_out, cost_usd, \
                           error, started_at, finished_at";

fn row_to_job(row: &SqliteRow) -> Result<Job> {
    let status: String = row.get("status");
    Ok(Job {
        id: row.get("id"),
        run_id: row.get("run_id"),
        day_date: row.get("day_date"),
        status: parse_column(&status)?,
        attempt: row.get::<i64, _>("attempt") as u32,
        tokens_in: row.get::<i64, _>("tokens_in") as u64,
        tokens_out: row.get::<i64, _>("tokens_out") as u64,
        cost_usd: row.get("cost_usd"),
        error: row.get("error"),
        started_at: parse_opt_ts(row.get("started_at"))?,
        finished_at: parse_opt_ts(row.get("finished_at"))?,
    })
}

/// Usage recorded on a successful job
#[derive(Debug, Clone, Copy, Default)]
pub struct JobUsage {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
}

/// Job counts for one run, by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub queued: u32,
    pub running: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub cancelled: u32,
}

impl JobCounts {
    /// Jobs that a future tick could still pick up or is processing
    pub fn open(&self) -> u32 {
        self.queued + self.running
    }
}

pub async fn list_jobs(pool: &SqlitePool, run_id: &str) -> Result<Vec<Job>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM jobs WHERE run_id = ? ORDER BY day_date",
        JOB_COLUMNS
    ))
    .bind(run_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_job).collect()
}

pub async fn get_job_by_day(pool: &SqlitePool, run_id: &str, day_date: &str) -> Result<Option<Job>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM jobs WHERE run_id = ? AND day_date = ?",
        JOB_COLUMNS
    ))
    .bind(run_id)
    .bind(day_date)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_job).transpose()
}

/// Up to `limit` QUEUED jobs, earliest day first
pub async fn next_queued_jobs(pool: &SqlitePool, run_id: &str, limit: u32) -> Result<Vec<Job>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM jobs WHERE run_id = ? AND status = 'QUEUED' ORDER BY day_date LIMIT ?",
        JOB_COLUMNS
    ))
    .bind(run_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_job).collect()
}

/// QUEUED → RUNNING. False if the job was no longer QUEUED.
pub async fn mark_job_running(pool: &SqlitePool, job_id: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE jobs SET status = 'RUNNING', started_at = ?, error = NULL WHERE id = ? AND status = 'QUEUED'",
    )
    .bind(now_ts())
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// RUNNING → QUEUED for every job of the run. Only safe while holding the
/// run's advisory lock: a RUNNING job then belongs to a tick that died.
pub async fn requeue_stranded_jobs(pool: &SqlitePool, run_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE jobs SET status = 'QUEUED', started_at = NULL WHERE run_id = ? AND status = 'RUNNING'",
    )
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// RUNNING → FAILED with an error message. False if the job was no longer RUNNING.
pub async fn fail_job(pool: &SqlitePool, job_id: &str, error: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE jobs SET status = 'FAILED', error = ?, finished_at = ? WHERE id = ? AND status = 'RUNNING'",
    )
    .bind(error)
    .bind(now_ts())
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// RUNNING → SUCCEEDED and write the stage output, atomically.
///
/// The output is written only if the status update matched, so a job
/// cancelled while its model call was in flight gets no output. Returns
/// whether the job was completed.
pub async fn complete_job(
    pool: &SqlitePool,
    job_id: &str,
    usage: JobUsage,
    output: &NewOutput,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE jobs SET status = 'SUCCEEDED', tokens_in = ?, tokens_out = ?, cost_usd = ?,
                        error = NULL, finished_at = ?
        WHERE id = ? AND status = 'RUNNING'
        "#,
    )
    .bind(usage.tokens_in as i64)
    .bind(usage.tokens_out as i64)
    .bind(usage.cost_usd)
    .bind(now_ts())
    .bind(job_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated != 1 {
        tx.rollback().await?;
        return Ok(false);
    }

    insert_output(&mut tx, job_id, output).await?;
    tx.commit().await?;
    Ok(true)
}

pub async fn count_jobs_by_status(pool: &SqlitePool, run_id: &str) -> Result<JobCounts> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs WHERE run_id = ? GROUP BY status")
        .bind(run_id)
        .fetch_all(pool)
        .await?;

    let mut counts = JobCounts::default();
    for row in rows {
        let status: String = row.get("status");
        let n = row.get::<i64, _>("n") as u32;
        match parse_column::<JobStatus>(&status)? {
            JobStatus::Queued => counts.queued = n,
            JobStatus::Running => counts.running = n,
            JobStatus::Succeeded => counts.succeeded = n,
            JobStatus::Failed => counts.failed = n,
            JobStatus::Cancelled => counts.cancelled = n,
        }
    }
    Ok(counts)
}
