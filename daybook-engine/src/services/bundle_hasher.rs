//! Content-addressed bundle hashes
//!
//! `bundle_hash` identifies the exact text sent to the model.
//! `bundle_context_hash` identifies the inputs that produced it, so an
//! inspector can rebuild the bundle from a Run's frozen config and compare.

use crate::error::EngineResult;
use crate::models::{FilterProfile, LabelSpec};
use sha2::{Digest, Sha256};

const BUNDLE_PREFIX: &str = "bundle_v1|";
const BUNDLE_CONTEXT_PREFIX: &str = "bundle_ctx_v1|";

/// Everything that determines a bundle's content
#[derive(Debug, Clone)]
pub struct BundleContext<'a> {
    pub batch_id: &'a str,
    pub day_date: &'a str,
    pub sources: &'a [String],
    pub filter_profile: &'a FilterProfile,
    pub label_spec: &'a LabelSpec,
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// sha256 hex of `"bundle_v1|" + bundle_text`
pub fn bundle_hash(bundle_text: &str) -> String {
    let mut payload = String::with_capacity(BUNDLE_PREFIX.len() + bundle_text.len());
    payload.push_str(BUNDLE_PREFIX);
    payload.push_str(bundle_text);
    sha256_hex(payload.as_bytes())
}

/// Key-sorted JSON serialisation
fn canonical_json<T: serde::Serialize>(value: &T) -> EngineResult<String> {
    let json_value = serde_json::to_value(value)?;
    let bytes = serde_json_canonicalizer::to_vec(&json_value)?;
    String::from_utf8(bytes)
        .map_err(|e| crate::error::EngineError::Internal(format!("canonical JSON not UTF-8: {}", e)))
}

/// sha256 hex of `"bundle_ctx_v1|"` + pipe-joined
/// `batch_id | day | sorted sources (comma-joined) | filter profile | label spec`
pub fn bundle_context_hash(ctx: &BundleContext<'_>) -> EngineResult<String> {
    let mut sources: Vec<&str> = ctx.sources.iter().map(String::as_str).collect();
    sources.sort_unstable();

    let fields = [
        ctx.batch_id.to_string(),
        ctx.day_date.to_string(),
        sources.join(","),
        canonical_json(ctx.filter_profile)?,
        canonical_json(ctx.label_spec)?,
    ];

    let payload = format!("{}{}", BUNDLE_CONTEXT_PREFIX, fields.join("|"));
    Ok(sha256_hex(payload.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, FilterMode};

    fn profile() -> FilterProfile {
        FilterProfile {
            name: "default".into(),
            mode: FilterMode::Exclude,
            categories: vec![Category::Personal],
        }
    }

    fn label_spec() -> LabelSpec {
        LabelSpec {
            model: "stub_v1".into(),
            prompt_version_id: "classify_stub_v1".into(),
        }
    }

    #[test]
    fn test_bundle_hash_uses_versioned_prefix() {
        let expected = sha256_hex(b"bundle_v1|hello");
        assert_eq!(bundle_hash("hello"), expected);
        assert_ne!(bundle_hash("hello"), sha256_hex(b"hello"));
    }

    #[test]
    fn test_context_hash_ignores_source_order() {
        let (profile, spec) = (profile(), label_spec());
        let hash_for = |sources: Vec<String>| {
            bundle_context_hash(&BundleContext {
                batch_id: "b1",
                day_date: "2024-01-01",
                sources: &sources,
                filter_profile: &profile,
                label_spec: &spec,
            })
            .unwrap()
        };
        assert_eq!(
            hash_for(vec!["chatgpt".to_string(), "claude".to_string()]),
            hash_for(vec!["claude".to_string(), "chatgpt".to_string()])
        );
    }

    #[test]
    fn test_context_hash_changes_with_inputs() {
        let spec = label_spec();
        let sources = vec!["chatgpt".to_string()];
        let base_profile = profile();
        let base = BundleContext {
            batch_id: "b1",
            day_date: "2024-01-01",
            sources: &sources,
            filter_profile: &base_profile,
            label_spec: &spec,
        };
        let base_hash = bundle_context_hash(&base).unwrap();

        let other_day = BundleContext {
            day_date: "2024-01-02",
            ..base.clone()
        };
        assert_ne!(bundle_context_hash(&other_day).unwrap(), base_hash);

        let mut include = profile();
        include.mode = FilterMode::Include;
        let other_profile = BundleContext {
            filter_profile: &include,
            ..base.clone()
        };
        assert_ne!(bundle_context_hash(&other_profile).unwrap(), base_hash);
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let json = canonical_json(&label_spec()).unwrap();
        assert_eq!(json, r#"{"model":"stub_v1","promptVersionId":"classify_stub_v1"}"#);
        let json = canonical_json(&profile()).unwrap();
        assert_eq!(
            json,
            r#"{"categories":["PERSONAL"],"mode":"exclude","name":"default"}"#
        );
    }
}
