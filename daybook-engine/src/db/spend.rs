//! Spend aggregates for budget checks

use daybook_common::Result;
use sqlx::SqlitePool;

/// Today's UTC date as stored in timestamp prefixes
pub fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

/// USD spent on `day` (YYYY-MM-DD, UTC): jobs finished that day plus
/// classify invocations started that day, including ones still running.
pub async fn day_spend_usd(pool: &SqlitePool, day: &str) -> Result<f64> {
    let spent: f64 = sqlx::query_scalar(
        r#"
        SELECT
            (SELECT COALESCE(SUM(cost_usd), 0.0) FROM jobs WHERE substr(finished_at, 1, 10) = ?)
          + (SELECT COALESCE(SUM(cost_usd), 0.0) FROM classify_runs WHERE substr(started_at, 1, 10) = ?)
        "#,
    )
    .bind(day)
    .bind(day)
    .fetch_one(pool)
    .await?;
    Ok(spent)
}

/// USD already recorded on a run's jobs
pub async fn run_spend_usd(pool: &SqlitePool, run_id: &str) -> Result<f64> {
    let spent: f64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(cost_usd), 0.0) FROM jobs WHERE run_id = ?")
            .bind(run_id)
            .fetch_one(pool)
            .await?;
    Ok(spent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use daybook_common::db::init_database;
    use tempfile::TempDir;

    async fn insert_job(pool: &SqlitePool, run_id: &str, day: &str, cost: f64, finished_at: Option<&str>) {
        sqlx::query(
            "INSERT INTO jobs (id, run_id, day_date, status, cost_usd, finished_at) VALUES (?, ?, ?, 'SUCCEEDED', ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(run_id)
        .bind(day)
        .bind(cost)
        .bind(finished_at)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_day_spend_combines_jobs_and_classify_runs() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("test.db")).await.unwrap();

        sqlx::query("INSERT INTO import_batches (id, source_format, created_at) VALUES ('b1', 'chatgpt', '2024-01-01T00:00:00.000000Z')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO runs (id, import_batch_id, status, config_json, created_at) VALUES ('r1', 'b1', 'RUNNING', '{}', '2024-01-01T00:00:00.000000Z')")
            .execute(&pool)
            .await
            .unwrap();

        insert_job(&pool, "r1", "2023-12-30", 0.25, Some("2024-01-05T10:00:00.000000Z")).await;
        insert_job(&pool, "r1", "2023-12-31", 0.5, Some("2024-01-05T23:59:59.999999Z")).await;
        insert_job(&pool, "r1", "2024-01-01", 1.0, Some("2024-01-06T00:00:00.000000Z")).await;
        insert_job(&pool, "r1", "2024-01-02", 2.0, None).await;

        sqlx::query(
            "INSERT INTO classify_runs (id, batch_id, model, prompt_version_id, mode, status, cost_usd, started_at) \
             VALUES ('c1', 'b1', 'm', 'classify_v1', 'real', 'running', 0.125, '2024-01-05T12:00:00.000000Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let day = day_spend_usd(&pool, "2024-01-05").await.unwrap();
        assert!((day - 0.875).abs() < 1e-12);
        assert_eq!(day_spend_usd(&pool, "2024-01-07").await.unwrap(), 0.0);

        let run = run_spend_usd(&pool, "r1").await.unwrap();
        assert!((run - 3.75).abs() < 1e-12);
    }

    #[test]
    fn test_today_is_a_date() {
        let day = today();
        assert_eq!(day.len(), 10);
        assert!(chrono::NaiveDate::parse_from_str(&day, "%Y-%m-%d").is_ok());
    }
}
