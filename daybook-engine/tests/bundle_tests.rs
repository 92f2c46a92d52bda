//! Bundle builder integration tests: source selection, label filters, ordering

mod helpers;

use daybook_common::db::STUB_CLASSIFY_PROMPT_VERSION;
use daybook_engine::db::atoms::list_atoms;
use daybook_engine::models::{
    Category, ClassifyRequest, FilterMode, FilterProfile, LabelSpec, MessageAtom,
};
use daybook_engine::services::{BundleBuilder, SqliteBundleBuilder};
use daybook_engine::{Engine, FakeClock};
use helpers::*;
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

const DAY: &str = "2024-05-10";
const LABEL_MODEL: &str = "stub-classifier";

fn stub_labels() -> LabelSpec {
    LabelSpec {
        model: LABEL_MODEL.to_string(),
        prompt_version_id: STUB_CLASSIFY_PROMPT_VERSION.to_string(),
    }
}

fn profile(mode: FilterMode, categories: Vec<Category>) -> FilterProfile {
    FilterProfile {
        name: "test".to_string(),
        mode,
        categories,
    }
}

fn sources(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Two sources on DAY plus noise on another day, stub-labeled
async fn setup() -> (TempDir, SqlitePool, String, Vec<MessageAtom>) {
    let (dir, pool) = create_test_db().await.unwrap();
    let mut atoms = make_atoms(DAY, "chatgpt", 12);
    atoms.extend(make_atoms(DAY, "claude", 8));
    atoms.extend(make_atoms("2024-05-11", "chatgpt", 5));
    let batch_id = seed_batch(&pool, &atoms).await.unwrap();

    let engine = Engine::builder(pool.clone())
        .with_settings(test_settings())
        .with_clock(Arc::new(FakeClock::new()))
        .build();
    engine
        .classify_batch(&ClassifyRequest::stub(&batch_id, LABEL_MODEL))
        .await
        .unwrap();

    let day_atoms = list_atoms(&pool, &batch_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.day_date == DAY)
        .collect();
    (dir, pool, batch_id, day_atoms)
}

#[tokio::test]
async fn test_include_keeps_only_listed_categories() {
    let (_dir, pool, batch_id, day_atoms) = setup().await;
    let builder = SqliteBundleBuilder::new(pool);

    let expected = day_atoms
        .iter()
        .filter(|a| Category::from_seed(&a.stable_id) == Category::Work)
        .count();
    let bundle = builder
        .build(
            &batch_id,
            DAY,
            &sources(&["chatgpt", "claude"]),
            &stub_labels(),
            &profile(FilterMode::Include, vec![Category::Work]),
        )
        .await
        .unwrap();
    assert_eq!(bundle.atom_count, expected);
}

#[tokio::test]
async fn test_exclude_drops_listed_categories() {
    let (_dir, pool, batch_id, day_atoms) = setup().await;
    let builder = SqliteBundleBuilder::new(pool);

    let expected = day_atoms
        .iter()
        .filter(|a| Category::from_seed(&a.stable_id) != Category::Personal)
        .count();
    let bundle = builder
        .build(
            &batch_id,
            DAY,
            &sources(&["chatgpt", "claude"]),
            &stub_labels(),
            &profile(FilterMode::Exclude, vec![Category::Personal]),
        )
        .await
        .unwrap();
    assert_eq!(bundle.atom_count, expected);
}

#[tokio::test]
async fn test_unlabeled_atoms_follow_filter_mode() {
    let (_dir, pool, batch_id, _day_atoms) = setup().await;
    let builder = SqliteBundleBuilder::new(pool);
    let unlabeled_spec = LabelSpec {
        model: "never-ran".to_string(),
        prompt_version_id: STUB_CLASSIFY_PROMPT_VERSION.to_string(),
    };
    let both = sources(&["chatgpt", "claude"]);

    let include = builder
        .build(&batch_id, DAY, &both, &unlabeled_spec, &profile(FilterMode::Include, Category::ALL.to_vec()))
        .await
        .unwrap();
    assert_eq!(include.atom_count, 0);

    let exclude = builder
        .build(&batch_id, DAY, &both, &unlabeled_spec, &profile(FilterMode::Exclude, Category::ALL.to_vec()))
        .await
        .unwrap();
    assert_eq!(exclude.atom_count, 20);
}

#[tokio::test]
async fn test_only_requested_sources_and_day_are_included() {
    let (_dir, pool, batch_id, _day_atoms) = setup().await;
    let builder = SqliteBundleBuilder::new(pool);

    let bundle = builder
        .build(
            &batch_id,
            DAY,
            &sources(&["claude"]),
            &stub_labels(),
            &profile(FilterMode::Exclude, Vec::new()),
        )
        .await
        .unwrap();
    assert_eq!(bundle.atom_count, 8);
    assert!(bundle.bundle_text.contains("## source: claude"));
    assert!(!bundle.bundle_text.contains("chatgpt"));
    assert!(!bundle.bundle_text.contains("2024-05-11"));
}

#[tokio::test]
async fn test_bundle_order_is_source_then_timestamp() {
    let (_dir, pool, batch_id, _day_atoms) = setup().await;
    let builder = SqliteBundleBuilder::new(pool);
    let everything = profile(FilterMode::Exclude, Vec::new());

    // Source order in the request does not matter
    let a = builder
        .build(&batch_id, DAY, &sources(&["claude", "chatgpt"]), &stub_labels(), &everything)
        .await
        .unwrap();
    let b = builder
        .build(&batch_id, DAY, &sources(&["chatgpt", "claude"]), &stub_labels(), &everything)
        .await
        .unwrap();
    assert_eq!(a, b);

    let chatgpt_at = a.bundle_text.find("## source: chatgpt").unwrap();
    let claude_at = a.bundle_text.find("## source: claude").unwrap();
    assert!(chatgpt_at < claude_at);

    let first = a.bundle_text.find("chatgpt message 0 on").unwrap();
    let second = a.bundle_text.find("chatgpt message 1 on").unwrap();
    assert!(first < second);
}
