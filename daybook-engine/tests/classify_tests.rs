//! Classification pipeline integration tests

mod helpers;

use daybook_common::db::{DEFAULT_CLASSIFY_PROMPT_VERSION, STUB_CLASSIFY_PROMPT_VERSION};
use daybook_engine::db::atoms::{delete_labels, get_label_category, list_atoms};
use daybook_engine::db::prompts::insert_prompt_version;
use daybook_engine::llm::{BudgetPolicy, LlmClient};
use daybook_engine::models::{Category, ClassifyMode, ClassifyRequest, ClassifyStatus};
use daybook_engine::{Engine, EngineSettings, FakeClock};
use helpers::*;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

const STUB_MODEL: &str = "stub-classifier";

fn stub_engine(pool: &SqlitePool) -> Engine {
    Engine::builder(pool.clone())
        .with_settings(test_settings())
        .with_clock(Arc::new(FakeClock::new()))
        .build()
}

fn scripted_engine(pool: &SqlitePool, adapter: Arc<ScriptedAdapter>) -> Engine {
    Engine::builder(pool.clone())
        .with_llm(Arc::new(mock_client(adapter)))
        .with_settings(test_settings())
        .with_clock(Arc::new(FakeClock::new()))
        .build()
}

fn real_request(batch_id: &str) -> ClassifyRequest {
    ClassifyRequest {
        batch_id: batch_id.to_string(),
        provider: MOCK_PROVIDER.to_string(),
        model: MOCK_MODEL.to_string(),
        prompt_version_id: DEFAULT_CLASSIFY_PROMPT_VERSION.to_string(),
        mode: ClassifyMode::Real,
        budget: None,
    }
}

async fn classify_run_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM classify_runs")
        .fetch_one(pool)
        .await
        .unwrap()
}

// ============================================================================
// Stub mode
// ============================================================================

#[tokio::test]
async fn test_stub_classification_labels_every_atom() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let batch_id = seed_batch(&pool, &make_atoms("2024-03-01", "chatgpt", 10))
        .await
        .unwrap();
    let engine = stub_engine(&pool);

    let audit = engine
        .classify_batch(&ClassifyRequest::stub(&batch_id, STUB_MODEL))
        .await
        .unwrap();

    assert_eq!(audit.status, ClassifyStatus::Succeeded);
    assert_eq!(audit.mode, ClassifyMode::Stub);
    assert_eq!(audit.total_atoms, 10);
    assert_eq!(audit.counters.processed_atoms, 10);
    assert_eq!(audit.counters.newly_labeled, 10);
    assert_eq!(audit.counters.skipped_already_labeled, 0);
    assert_eq!(audit.counters.labeled_total, 10);
    assert_eq!(audit.counters.tokens_in, 0);
    assert!(audit.finished_at.is_some());
    assert!(audit.error_json.is_none());
}

#[tokio::test]
async fn test_second_invocation_labels_nothing_and_writes_new_row() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let batch_id = seed_batch(&pool, &make_atoms("2024-03-01", "chatgpt", 12))
        .await
        .unwrap();
    let engine = stub_engine(&pool);
    let request = ClassifyRequest::stub(&batch_id, STUB_MODEL);

    let first = engine.classify_batch(&request).await.unwrap();
    let second = engine.classify_batch(&request).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(second.counters.newly_labeled, 0);
    assert_eq!(second.counters.processed_atoms, 0);
    assert_eq!(second.counters.skipped_already_labeled, second.total_atoms);
    assert_eq!(second.counters.labeled_total, 12);

    let rows = engine.list_classify_runs(&batch_id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id, first.id);
    assert_eq!(rows[1].counters.skipped_already_labeled, 12);
}

#[tokio::test]
async fn test_stub_labels_are_deterministic_across_reclassification() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let batch_id = seed_batch(&pool, &make_atoms("2024-03-01", "claude", 8))
        .await
        .unwrap();
    let engine = stub_engine(&pool);
    let request = ClassifyRequest::stub(&batch_id, STUB_MODEL);

    engine.classify_batch(&request).await.unwrap();
    let atoms = list_atoms(&pool, &batch_id).await.unwrap();

    let mut before = Vec::new();
    for atom in &atoms {
        let category = get_label_category(&pool, &atom.id, STUB_MODEL, STUB_CLASSIFY_PROMPT_VERSION)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(category, Category::from_seed(&atom.stable_id).as_str());
        before.push(category);
    }

    let deleted = delete_labels(&pool, &batch_id, STUB_MODEL, STUB_CLASSIFY_PROMPT_VERSION)
        .await
        .unwrap();
    assert_eq!(deleted, 8);
    let again = engine.classify_batch(&request).await.unwrap();
    assert_eq!(again.counters.newly_labeled, 8);

    for (atom, expected) in atoms.iter().zip(before) {
        let category = get_label_category(&pool, &atom.id, STUB_MODEL, STUB_CLASSIFY_PROMPT_VERSION)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(category, expected);
    }
}

#[tokio::test]
async fn test_stub_pagination_covers_more_than_one_page() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let batch_id = seed_batch(&pool, &make_atoms("2024-03-01", "chatgpt", 25))
        .await
        .unwrap();
    let settings = daybook_engine::EngineSettings {
        classify_page_size: 7,
        ..test_settings()
    };
    let engine = Engine::builder(pool.clone())
        .with_settings(settings)
        .with_clock(Arc::new(FakeClock::new()))
        .build();

    let audit = engine
        .classify_batch(&ClassifyRequest::stub(&batch_id, STUB_MODEL))
        .await
        .unwrap();
    assert_eq!(audit.counters.newly_labeled, 25);

    let atoms = list_atoms(&pool, &batch_id).await.unwrap();
    let max_stable_id = atoms.iter().map(|a| a.stable_id.clone()).max();
    assert_eq!(audit.counters.last_atom_stable_id_processed, max_stable_id);
}

// ============================================================================
// Validation before the audit row
// ============================================================================

#[tokio::test]
async fn test_unknown_batch_is_not_found_and_writes_nothing() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let engine = stub_engine(&pool);

    let err = engine
        .classify_batch(&ClassifyRequest::stub("missing-batch", STUB_MODEL))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
    assert_eq!(classify_run_count(&pool).await, 0);
}

#[tokio::test]
async fn test_real_mode_rejects_unsuitable_prompts() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let batch_id = seed_batch(&pool, &make_atoms("2024-03-01", "chatgpt", 3))
        .await
        .unwrap();
    insert_prompt_version(&pool, "classify_loose", "classify", "Label this message.")
        .await
        .unwrap();
    let adapter = Arc::new(ScriptedAdapter::new());
    let engine = scripted_engine(&pool, adapter.clone());

    for prompt in ["summarize_v1", STUB_CLASSIFY_PROMPT_VERSION, "classify_loose"] {
        let mut request = real_request(&batch_id);
        request.prompt_version_id = prompt.to_string();
        let err = engine.classify_batch(&request).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT", "prompt {}", prompt);
    }

    let mut request = real_request(&batch_id);
    request.prompt_version_id = "no_such_prompt".to_string();
    assert_eq!(engine.classify_batch(&request).await.unwrap_err().code(), "NOT_FOUND");

    assert_eq!(classify_run_count(&pool).await, 0);
    assert_eq!(adapter.calls(), 0);
}

#[tokio::test]
async fn test_real_mode_missing_key_fails_before_audit_row() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let batch_id = seed_batch(&pool, &make_atoms("2024-03-01", "chatgpt", 3))
        .await
        .unwrap();
    let engine = stub_engine(&pool);
    let llm = LlmClient::new(
        daybook_engine::llm::LlmMode::Real,
        daybook_engine::llm::PricingBook::builtin(),
        daybook_engine::ApiKeys::empty(),
    );
    let engine_real = Engine::builder(engine.pool().clone())
        .with_llm(Arc::new(llm))
        .with_settings(test_settings())
        .build();

    let mut request = real_request(&batch_id);
    request.provider = "openai".to_string();
    let err = engine_real.classify_batch(&request).await.unwrap_err();
    assert_eq!(err.code(), "MISSING_API_KEY");
    assert_eq!(classify_run_count(&pool).await, 0);
}

// ============================================================================
// Real mode
// ============================================================================

#[tokio::test]
async fn test_dry_run_client_in_real_mode_labels_from_stable_id() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let batch_id = seed_batch(&pool, &make_atoms("2024-03-01", "chatgpt", 6))
        .await
        .unwrap();
    let engine = stub_engine(&pool);

    let mut request = real_request(&batch_id);
    request.provider = "openai".to_string();
    request.model = "gpt-4o-mini".to_string();
    let audit = engine.classify_batch(&request).await.unwrap();

    assert_eq!(audit.status, ClassifyStatus::Succeeded);
    assert_eq!(audit.counters.newly_labeled, 6);
    assert_eq!(audit.counters.skipped_bad_output, 0);
    assert_eq!(audit.counters.cost_usd, 0.0);
    assert!(audit.counters.tokens_in > 0);

    for atom in list_atoms(&pool, &batch_id).await.unwrap() {
        let category = get_label_category(&pool, &atom.id, "gpt-4o-mini", DEFAULT_CLASSIFY_PROMPT_VERSION)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(category, Category::from_seed(&atom.stable_id).as_str());
    }
}

#[tokio::test]
async fn test_bad_output_is_counted_and_skipped() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let batch_id = seed_batch(&pool, &make_atoms("2024-03-01", "chatgpt", 5))
        .await
        .unwrap();
    let adapter = Arc::new(ScriptedAdapter::new().with_responses(&[
        "I think this is about work.",
        "Sure!\n```json\n{\"category\": \"ethical\", \"confidence\": 0.8}\n```",
        r#"{"category": "WORK", "confidence": 1.5}"#,
        r#"Answer: {"category": "sports", "confidence": 0.4} hope that helps"#,
    ]));
    let engine = scripted_engine(&pool, adapter.clone());

    let audit = engine.classify_batch(&real_request(&batch_id)).await.unwrap();

    assert_eq!(audit.status, ClassifyStatus::Succeeded);
    assert_eq!(adapter.calls(), 5);
    assert_eq!(audit.counters.processed_atoms, 5);
    assert_eq!(audit.counters.skipped_bad_output, 3);
    assert_eq!(audit.counters.newly_labeled, 2);
    assert_eq!(audit.counters.aliased_count, 1);
    assert_eq!(audit.counters.tokens_in, 500);
    assert!((audit.counters.cost_usd - 5.0 * 0.00014).abs() < 1e-12);
}

#[tokio::test]
async fn test_provider_failure_mid_batch_is_persisted() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let batch_id = seed_batch(&pool, &make_atoms("2024-03-01", "chatgpt", 130))
        .await
        .unwrap();
    let adapter = Arc::new(ScriptedAdapter::new().failing_after(105));
    let engine = scripted_engine(&pool, adapter);

    let err = engine.classify_batch(&real_request(&batch_id)).await.unwrap_err();
    assert_eq!(err.code(), "LLM_PROVIDER_ERROR");

    let rows = engine.list_classify_runs(&batch_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    let audit = &rows[0];
    assert_eq!(audit.status, ClassifyStatus::Failed);
    assert_eq!(audit.total_atoms, 130);
    assert!(audit.counters.processed_atoms >= 100);
    assert!(audit.counters.processed_atoms < audit.total_atoms);
    assert!(audit.counters.newly_labeled > 0);
    assert!(audit.counters.last_atom_stable_id_processed.is_some());
    assert!(audit.finished_at.is_some());

    let error_json = audit.error_json.as_ref().unwrap();
    assert_eq!(error_json["code"], err.code());
    assert_eq!(error_json["details"]["provider"], MOCK_PROVIDER);

    // Labels written before the failure survive; a retry picks up the rest
    let retry = scripted_engine(&pool, Arc::new(ScriptedAdapter::new()));
    let second = retry.classify_batch(&real_request(&batch_id)).await.unwrap();
    assert_eq!(second.counters.skipped_already_labeled, 105);
    assert_eq!(second.counters.newly_labeled, 25);
}

#[tokio::test]
async fn test_checkpoint_written_after_hundred_atoms() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let batch_id = seed_batch(&pool, &make_atoms("2024-03-01", "chatgpt", 130))
        .await
        .unwrap();
    // No sleeps, so virtual time never reaches the interval trigger
    let adapter = Arc::new(ScriptedAdapter::new().observing_audit(&pool, &[100, 101]));
    let engine = scripted_engine(&pool, adapter.clone());

    let audit = engine.classify_batch(&real_request(&batch_id)).await.unwrap();
    assert_eq!(audit.counters.processed_atoms, 130);

    let seen = adapter.audit_snapshots();
    assert_eq!(
        seen,
        vec![
            AuditSnapshot {
                call: 100,
                processed_atoms: 0,
                status: "running".to_string(),
            },
            AuditSnapshot {
                call: 101,
                processed_atoms: 100,
                status: "running".to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn test_checkpoint_written_after_interval_elapses() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let batch_id = seed_batch(&pool, &make_atoms("2024-03-01", "chatgpt", 10))
        .await
        .unwrap();
    let adapter = Arc::new(ScriptedAdapter::new().observing_audit(&pool, &[4, 5]));
    let clock = Arc::new(FakeClock::new());

    // Calls land at 0 s, 2 s, 4 s, 6 s, ...; the 5 s interval trips after the
    // fourth atom, long before the 100-atom trigger
    let settings = EngineSettings {
        min_delay_ms: 2000,
        checkpoint_every_atoms: 100,
        checkpoint_interval: Duration::from_secs(5),
        ..test_settings()
    };
    let engine = Engine::builder(pool.clone())
        .with_llm(Arc::new(mock_client(adapter.clone())))
        .with_settings(settings)
        .with_clock(clock.clone())
        .build();

    let audit = engine.classify_batch(&real_request(&batch_id)).await.unwrap();
    assert_eq!(audit.status, ClassifyStatus::Succeeded);
    assert_eq!(audit.counters.processed_atoms, 10);
    assert_eq!(clock.elapsed(), Duration::from_secs(18));

    let seen = adapter.audit_snapshots();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].processed_atoms, 0);
    assert_eq!(seen[1].processed_atoms, 4);
    assert!(seen.iter().all(|s| s.status == "running"));
}

#[tokio::test]
async fn test_budget_cap_aborts_classification() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let batch_id = seed_batch(&pool, &make_atoms("2024-03-01", "chatgpt", 4))
        .await
        .unwrap();
    let adapter = Arc::new(ScriptedAdapter::new());
    let engine = scripted_engine(&pool, adapter.clone());

    let mut request = real_request(&batch_id);
    request.budget = Some(BudgetPolicy {
        max_usd_per_run: Some(0.000001),
        max_usd_per_day: None,
    });
    let err = engine.classify_batch(&request).await.unwrap_err();
    assert_eq!(err.code(), "BUDGET_EXCEEDED");
    assert_eq!(adapter.calls(), 0);

    let audit = &engine.list_classify_runs(&batch_id).await.unwrap()[0];
    assert_eq!(audit.status, ClassifyStatus::Failed);
    assert_eq!(audit.counters.processed_atoms, 0);
    let error_json = audit.error_json.as_ref().unwrap();
    assert_eq!(error_json["details"]["limitType"], "per_run");
}
