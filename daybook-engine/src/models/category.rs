//! Closed message category set
//!
//! The order of `Category::ALL` is load-bearing: stub and dry-run
//! classification index into it by hash, so reordering changes every
//! deterministic label.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Work,
    Learning,
    Creative,
    Mundane,
    Personal,
    Other,
}

/// Near-miss labels models commonly emit, mapped onto the closed set
const ALIASES: &[(&str, Category)] = &[
    ("ETHICAL", Category::Personal),
    ("EMOTIONAL", Category::Personal),
    ("RELATIONSHIPS", Category::Personal),
    ("CODING", Category::Work),
    ("PROGRAMMING", Category::Work),
    ("EDUCATION", Category::Learning),
    ("STUDY", Category::Learning),
    ("ART", Category::Creative),
    ("WRITING", Category::Creative),
    ("ADMIN", Category::Mundane),
    ("CHORES", Category::Mundane),
];

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Work,
        Category::Learning,
        Category::Creative,
        Category::Mundane,
        Category::Personal,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Work => "WORK",
            Category::Learning => "LEARNING",
            Category::Creative => "CREATIVE",
            Category::Mundane => "MUNDANE",
            Category::Personal => "PERSONAL",
            Category::Other => "OTHER",
        }
    }

    /// Uppercase, trim, and turn spaces/hyphens into underscores
    pub fn normalize(raw: &str) -> String {
        raw.trim()
            .to_uppercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect()
    }

    /// Resolve a model-supplied label. Returns the category and whether an
    /// alias was needed, or `None` when it is outside the closed set.
    pub fn resolve(raw: &str) -> Option<(Category, bool)> {
        let normalized = Self::normalize(raw);
        if let Ok(category) = normalized.parse::<Category>() {
            return Some((category, false));
        }
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map(|(_, category)| (*category, true))
    }

    /// Deterministic category: first four sha256 bytes (big-endian) mod 6
    pub fn from_seed(seed: &str) -> Category {
        let digest = Sha256::digest(seed.as_bytes());
        let n = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        Self::ALL[(n as usize) % Self::ALL.len()]
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown category '{}'", s))
    }
}
