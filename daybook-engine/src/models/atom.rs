//! Imported message data: batches, atoms, labels, prompt versions

use super::category::Category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatch {
    pub id: String,
    pub source_format: String,
    pub original_filename: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One message from an imported conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAtom {
    pub id: String,
    pub batch_id: String,
    pub stable_id: String,
    pub source: String,
    pub role: String,
    pub text: String,
    /// RFC 3339 timestamp as imported
    pub timestamp: String,
    /// Local calendar day (YYYY-MM-DD) the atom belongs to
    pub day_date: String,
}

/// Atom fields supplied by an importer; ids are derived on insert
#[derive(Debug, Clone)]
pub struct NewAtom {
    pub source: String,
    pub role: String,
    pub text: String,
    pub timestamp: String,
    pub day_date: String,
}

impl NewAtom {
    pub fn stable_id(&self) -> String {
        compute_stable_id(&self.source, &self.role, &self.timestamp, &self.text)
    }
}

/// Content-derived atom identity: sha256 hex of `source|role|timestamp|text`
pub fn compute_stable_id(source: &str, role: &str, timestamp: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"|");
    hasher.update(role.as_bytes());
    hasher.update(b"|");
    hasher.update(timestamp.as_bytes());
    hasher.update(b"|");
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Label to write for one atom
#[derive(Debug, Clone, PartialEq)]
pub struct NewLabel {
    pub atom_id: String,
    pub category: Category,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptVersion {
    pub id: String,
    pub stage: String,
    pub template_text: String,
}
