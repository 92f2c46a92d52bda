//! Day bundle assembly
//!
//! A bundle is the text a summarize job sends to the model: one day of a
//! batch, restricted to the run's sources, filtered by category labels.
//! Rendering is deterministic so the stored bundle hash can be recomputed.

use crate::db::atoms::list_day_atoms_with_labels;
use crate::error::EngineResult;
use crate::models::{Category, FilterProfile, LabelSpec, MessageAtom};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt::Write;
use tracing::debug;

/// Rendered bundle for one day
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub bundle_text: String,
    /// Included atoms, in render order
    pub atom_stable_ids: Vec<String>,
    pub atom_count: usize,
}

#[async_trait]
pub trait BundleBuilder: Send + Sync {
    async fn build(
        &self,
        batch_id: &str,
        day_date: &str,
        sources: &[String],
        label_spec: &LabelSpec,
        filter_profile: &FilterProfile,
    ) -> EngineResult<Bundle>;
}

/// Builds bundles from `message_atoms` joined with `message_labels`
#[derive(Clone)]
pub struct SqliteBundleBuilder {
    pool: SqlitePool,
}

impl SqliteBundleBuilder {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BundleBuilder for SqliteBundleBuilder {
    async fn build(
        &self,
        batch_id: &str,
        day_date: &str,
        sources: &[String],
        label_spec: &LabelSpec,
        filter_profile: &FilterProfile,
    ) -> EngineResult<Bundle> {
        let rows =
            list_day_atoms_with_labels(&self.pool, batch_id, day_date, sources, label_spec).await?;
        let total = rows.len();

        let kept: Vec<MessageAtom> = rows
            .into_iter()
            .filter(|(_, label)| {
                // Labels outside the closed set count as unlabeled
                let category = label.as_deref().and_then(|c| c.parse::<Category>().ok());
                filter_profile.admits(category)
            })
            .map(|(atom, _)| atom)
            .collect();

        debug!(
            batch_id,
            day = day_date,
            total,
            kept = kept.len(),
            profile = %filter_profile.name,
            "Bundle atoms selected"
        );

        Ok(render_bundle(day_date, &kept))
    }
}

/// Render already-ordered atoms. Atoms must be sorted by source first.
pub fn render_bundle(day_date: &str, atoms: &[MessageAtom]) -> Bundle {
    let mut text = format!("# day: {}\n", day_date);
    let mut current_source: Option<&str> = None;

    for atom in atoms {
        if current_source != Some(atom.source.as_str()) {
            let _ = write!(text, "\n## source: {}\n", atom.source);
            current_source = Some(atom.source.as_str());
        }
        let _ = writeln!(text, "[{}] {}: {}", atom.timestamp, atom.role, atom.text);
    }

    Bundle {
        bundle_text: text,
        atom_stable_ids: atoms.iter().map(|a| a.stable_id.clone()).collect(),
        atom_count: atoms.len(),
    }
}
