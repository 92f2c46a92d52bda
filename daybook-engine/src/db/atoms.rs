//! Import batches, message atoms and labels

use super::{now_ts, parse_ts, placeholders};
use crate::models::{ImportBatch, LabelSpec, MessageAtom, NewAtom, NewLabel};
use daybook_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn row_to_atom(row: &SqliteRow) -> MessageAtom {
    MessageAtom {
        id: row.get("id"),
        batch_id: row.get("batch_id"),
        stable_id: row.get("stable_id"),
        source: row.get("source"),
        role: row.get("role"),
        text: row.get("text"),
        timestamp: row.get("timestamp"),
        day_date: row.get("day_date"),
    }
}

pub async fn create_batch(
    pool: &SqlitePool,
    source_format: &str,
    original_filename: Option<&str>,
) -> Result<ImportBatch> {
    let id = Uuid::new_v4().to_string();
    let created_at = now_ts();

    sqlx::query(
        "INSERT INTO import_batches (id, source_format, original_filename, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(source_format)
    .bind(original_filename)
    .bind(&created_at)
    .execute(pool)
    .await?;

    Ok(ImportBatch {
        id,
        source_format: source_format.to_string(),
        original_filename: original_filename.map(str::to_string),
        created_at: parse_ts(&created_at)?,
    })
}

pub async fn get_batch(pool: &SqlitePool, batch_id: &str) -> Result<Option<ImportBatch>> {
    let row = sqlx::query(
        "SELECT id, source_format, original_filename, created_at FROM import_batches WHERE id = ?",
    )
    .bind(batch_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        let created_at: String = row.get("created_at");
        Ok(ImportBatch {
            id: row.get("id"),
            source_format: row.get("source_format"),
            original_filename: row.get("original_filename"),
            created_at: parse_ts(&created_at)?,
        })
    })
    .transpose()
}

/// Insert atoms, skipping any whose stable id already exists in the batch.
/// Returns the number actually inserted.
pub async fn insert_atoms(pool: &SqlitePool, batch_id: &str, atoms: &[NewAtom]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;

    for atom in atoms {
        let result = sqlx::query(
            r#"
            INSERT INTO message_atoms (id, batch_id, stable_id, source, role, text, timestamp, day_date)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(batch_id, stable_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(batch_id)
        .bind(atom.stable_id())
        .bind(&atom.source)
        .bind(&atom.role)
        .bind(&atom.text)
        .bind(&atom.timestamp)
        .bind(&atom.day_date)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

pub async fn count_atoms(pool: &SqlitePool, batch_id: &str) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM message_atoms WHERE batch_id = ?")
        .bind(batch_id)
        .fetch_one(pool)
        .await?;
    Ok(count as u64)
}

/// Distinct days present in a batch, ascending
pub async fn list_days(pool: &SqlitePool, batch_id: &str) -> Result<Vec<String>> {
    let days = sqlx::query_scalar(
        "SELECT DISTINCT day_date FROM message_atoms WHERE batch_id = ? ORDER BY day_date",
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await?;
    Ok(days)
}

/// Next page of atoms with no label for (model, prompt version), ordered by
/// stable id and strictly after `after_stable_id`
pub async fn page_unlabeled_atoms(
    pool: &SqlitePool,
    batch_id: &str,
    model: &str,
    prompt_version_id: &str,
    after_stable_id: Option<&str>,
    limit: u32,
) -> Result<Vec<MessageAtom>> {
    let rows = sqlx::query(
        r#"
        SELECT a.id, a.batch_id, a.stable_id, a.source, a.role, a.text, a.timestamp, a.day_date
        FROM message_atoms a
        WHERE a.batch_id = ?
          AND a.stable_id > ?
          AND NOT EXISTS (
              SELECT 1 FROM message_labels l
              WHERE l.atom_id = a.id AND l.model = ? AND l.prompt_version_id = ?
          )
        ORDER BY a.stable_id
        LIMIT ?
        "#,
    )
    .bind(batch_id)
    .bind(after_stable_id.unwrap_or(""))
    .bind(model)
    .bind(prompt_version_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_atom).collect())
}

/// Atoms of one day and source set, each with its label category (if any)
/// under `label_spec`. Ordered by (source, timestamp, stable id).
pub async fn list_day_atoms_with_labels(
    pool: &SqlitePool,
    batch_id: &str,
    day_date: &str,
    sources: &[String],
    label_spec: &LabelSpec,
) -> Result<Vec<(MessageAtom, Option<String>)>> {
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        r#"
        SELECT a.id, a.batch_id, a.stable_id, a.source, a.role, a.text, a.timestamp, a.day_date,
               l.category AS category
        FROM message_atoms a
        LEFT JOIN message_labels l
               ON l.atom_id = a.id AND l.model = ? AND l.prompt_version_id = ?
        WHERE a.batch_id = ? AND a.day_date = ? AND a.source IN ({})
        ORDER BY a.source, a.timestamp, a.stable_id
        "#,
        placeholders(sources.len())
    );

    let mut query = sqlx::query(&sql)
        .bind(&label_spec.model)
        .bind(&label_spec.prompt_version_id)
        .bind(batch_id)
        .bind(day_date);
    for source in sources {
        query = query.bind(source);
    }

    let rows = query.fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| (row_to_atom(row), row.get::<Option<String>, _>("category")))
        .collect())
}

/// Insert labels, skipping atoms already labeled for (model, prompt version).
/// Returns the number actually inserted.
pub async fn insert_labels(
    pool: &SqlitePool,
    model: &str,
    prompt_version_id: &str,
    labels: &[NewLabel],
) -> Result<u64> {
    if labels.is_empty() {
        return Ok(0);
    }

    let created_at = now_ts();
    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;

    for label in labels {
        let result = sqlx::query(
            r#"
            INSERT INTO message_labels (id, atom_id, category, confidence, model, prompt_version_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(atom_id, prompt_version_id, model) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&label.atom_id)
        .bind(label.category.as_str())
        .bind(label.confidence)
        .bind(model)
        .bind(prompt_version_id)
        .bind(&created_at)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Labels in a batch for (model, prompt version)
pub async fn count_labels(
    pool: &SqlitePool,
    batch_id: &str,
    model: &str,
    prompt_version_id: &str,
) -> Result<u64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM message_labels l
        JOIN message_atoms a ON a.id = l.atom_id
        WHERE a.batch_id = ? AND l.model = ? AND l.prompt_version_id = ?
        "#,
    )
    .bind(batch_id)
    .bind(model)
    .bind(prompt_version_id)
    .fetch_one(pool)
    .await?;
    Ok(count as u64)
}

/// Remove labels in a batch for (model, prompt version) so they can be recomputed
pub async fn delete_labels(
    pool: &SqlitePool,
    batch_id: &str,
    model: &str,
    prompt_version_id: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM message_labels
        WHERE model = ? AND prompt_version_id = ?
          AND atom_id IN (SELECT id FROM message_atoms WHERE batch_id = ?)
        "#,
    )
    .bind(model)
    .bind(prompt_version_id)
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Category of one atom under (model, prompt version), if labeled
pub async fn get_label_category(
    pool: &SqlitePool,
    atom_id: &str,
    model: &str,
    prompt_version_id: &str,
) -> Result<Option<String>> {
    let category = sqlx::query_scalar(
        "SELECT category FROM message_labels WHERE atom_id = ? AND model = ? AND prompt_version_id = ?",
    )
    .bind(atom_id)
    .bind(model)
    .bind(prompt_version_id)
    .fetch_optional(pool)
    .await?;
    Ok(category)
}

pub async fn list_atoms(pool: &SqlitePool, batch_id: &str) -> Result<Vec<MessageAtom>> {
    let rows = sqlx::query(
        r#"
        SELECT id, batch_id, stable_id, source, role, text, timestamp, day_date
        FROM message_atoms WHERE batch_id = ? ORDER BY stable_id
        "#,
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_atom).collect())
}
