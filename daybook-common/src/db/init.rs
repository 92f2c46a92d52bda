//! Database initialization
//!
//! Creates the SQLite database on first run and brings the schema up to date.
//! Every statement is idempotent, so this runs on every startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Reserved prompt version used by stub classification
pub const STUB_CLASSIFY_PROMPT_VERSION: &str = "classify_stub_v1";

/// Default prompt version for real classification
pub const DEFAULT_CLASSIFY_PROMPT_VERSION: &str = "classify_v1";

/// Default prompt version for the daily summary stage
pub const DEFAULT_SUMMARIZE_PROMPT_VERSION: &str = "summarize_v1";

/// Per-connection wait before SQLite reports "database is locked"
const BUSY_TIMEOUT_MS: u64 = 5000;

const CLASSIFY_V1_TEMPLATE: &str = "You label a single message from an AI conversation export.\n\
Choose exactly one category from: WORK, LEARNING, CREATIVE, MUNDANE, PERSONAL, OTHER.\n\
Respond with JSON only: {\"category\": \"<CATEGORY>\", \"confidence\": <number between 0 and 1>}";

const SUMMARIZE_V1_TEMPLATE: &str = "You write a concise journal entry for one day of AI conversations.\n\
Summarize the main topics, decisions, and open questions. Do not invent details.";

/// Open (or create) the database file and initialise the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
                .foreign_keys(true)
                .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
        )
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and seed rows. Safe to call repeatedly.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_import_batches_table(pool).await?;
    create_message_atoms_table(pool).await?;
    create_prompt_versions_table(pool).await?;
    create_message_labels_table(pool).await?;
    create_runs_table(pool).await?;
    create_jobs_table(pool).await?;
    create_outputs_table(pool).await?;
    create_classify_runs_table(pool).await?;
    create_advisory_locks_table(pool).await?;

    init_default_prompt_versions(pool).await?;

    Ok(())
}

async fn create_import_batches_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_batches (
            id TEXT PRIMARY KEY,
            source_format TEXT NOT NULL,
            original_filename TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_message_atoms_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS message_atoms (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
            stable_id TEXT NOT NULL,
            source TEXT NOT NULL,
            role TEXT NOT NULL,
            text TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            day_date TEXT NOT NULL,
            UNIQUE (batch_id, stable_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_message_atoms_day ON message_atoms (batch_id, day_date, source)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_prompt_versions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prompt_versions (
            id TEXT PRIMARY KEY,
            stage TEXT NOT NULL,
            template_text TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_message_labels_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS message_labels (
            id TEXT PRIMARY KEY,
            atom_id TEXT NOT NULL REFERENCES message_atoms(id) ON DELETE CASCADE,
            category TEXT NOT NULL,
            confidence REAL NOT NULL,
            model TEXT NOT NULL,
            prompt_version_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (atom_id, prompt_version_id, model)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            import_batch_id TEXT NOT NULL REFERENCES import_batches(id),
            status TEXT NOT NULL,
            config_json TEXT NOT NULL,
            tokens_in INTEGER NOT NULL DEFAULT 0,
            tokens_out INTEGER NOT NULL DEFAULT 0,
            cost_usd REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            day_date TEXT NOT NULL,
            status TEXT NOT NULL,
            attempt INTEGER NOT NULL DEFAULT 1,
            tokens_in INTEGER NOT NULL DEFAULT 0,
            tokens_out INTEGER NOT NULL DEFAULT 0,
            cost_usd REAL NOT NULL DEFAULT 0.0,
            error TEXT,
            started_at TEXT,
            finished_at TEXT,
            UNIQUE (run_id, day_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_outputs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outputs (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            stage TEXT NOT NULL,
            output_text TEXT NOT NULL,
            output_json TEXT NOT NULL,
            model TEXT NOT NULL,
            prompt_version_id TEXT NOT NULL,
            bundle_hash TEXT NOT NULL,
            bundle_context_hash TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (job_id, stage)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_classify_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classify_runs (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES import_batches(id),
            model TEXT NOT NULL,
            prompt_version_id TEXT NOT NULL,
            mode TEXT NOT NULL,
            status TEXT NOT NULL,
            total_atoms INTEGER NOT NULL DEFAULT 0,
            processed_atoms INTEGER NOT NULL DEFAULT 0,
            newly_labeled INTEGER NOT NULL DEFAULT 0,
            skipped_already_labeled INTEGER NOT NULL DEFAULT 0,
            skipped_bad_output INTEGER NOT NULL DEFAULT 0,
            aliased_count INTEGER NOT NULL DEFAULT 0,
            labeled_total INTEGER NOT NULL DEFAULT 0,
            tokens_in INTEGER NOT NULL DEFAULT 0,
            tokens_out INTEGER NOT NULL DEFAULT 0,
            cost_usd REAL NOT NULL DEFAULT 0.0,
            last_atom_stable_id_processed TEXT,
            error_json TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_advisory_locks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS advisory_locks (
            lock_key INTEGER PRIMARY KEY,
            holder TEXT NOT NULL,
            acquired_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert the built-in prompt versions if they are missing
async fn init_default_prompt_versions(pool: &SqlitePool) -> Result<()> {
    ensure_prompt_version(
        pool,
        STUB_CLASSIFY_PROMPT_VERSION,
        "classify",
        "Deterministic stub classification (no model call).",
    )
    .await?;
    ensure_prompt_version(pool, DEFAULT_CLASSIFY_PROMPT_VERSION, "classify", CLASSIFY_V1_TEMPLATE)
        .await?;
    ensure_prompt_version(
        pool,
        DEFAULT_SUMMARIZE_PROMPT_VERSION,
        "summarize",
        SUMMARIZE_V1_TEMPLATE,
    )
    .await?;

    Ok(())
}

async fn ensure_prompt_version(
    pool: &SqlitePool,
    id: &str,
    stage: &str,
    template_text: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO prompt_versions (id, stage, template_text, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(stage)
    .bind(template_text)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn table_names(pool: &SqlitePool) -> Vec<String> {
        sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_init_creates_all_tables() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("daybook.db")).await.unwrap();

        let tables = table_names(&pool).await;
        for expected in [
            "advisory_locks",
            "classify_runs",
            "import_batches",
            "jobs",
            "message_atoms",
            "message_labels",
            "outputs",
            "prompt_versions",
            "runs",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
        }
    }

    #[tokio::test]
    async fn test_init_is_idempotent_and_seeds_prompts() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("daybook.db")).await.unwrap();
        init_schema(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM prompt_versions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 3);

        let stage: String =
            sqlx::query_scalar("SELECT stage FROM prompt_versions WHERE id = ?")
                .bind(STUB_CLASSIFY_PROMPT_VERSION)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(stage, "classify");
    }
}
