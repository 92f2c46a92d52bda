//! Scripted provider adapter for failure injection

use async_trait::async_trait;
use daybook_engine::llm::{
    AdapterResponse, LlmClient, LlmMode, LlmRequest, ModelRate, PricingBook, ProviderAdapter,
};
use daybook_engine::ApiKeys;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const MOCK_PROVIDER: &str = "mock";
pub const MOCK_MODEL: &str = "mock-model";

/// Answers with scripted text and fails every call after `fail_after`
pub struct ScriptedAdapter {
    calls: AtomicUsize,
    fail_after: Option<usize>,
    responses: Mutex<Vec<String>>,
    default_response: String,
    observer: Option<AuditObserver>,
}

/// Reads the newest classify audit row while chosen calls are in flight
struct AuditObserver {
    pool: SqlitePool,
    on_calls: Vec<usize>,
    seen: Mutex<Vec<AuditSnapshot>>,
}

/// Audit row state as seen from inside call number `call` (1-based)
#[derive(Debug, Clone, PartialEq)]
pub struct AuditSnapshot {
    pub call: usize,
    pub processed_atoms: i64,
    pub status: String,
}

impl ScriptedAdapter {
    /// Always answers `{"category": "WORK", "confidence": 0.9}`
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_after: None,
            responses: Mutex::new(Vec::new()),
            default_response: r#"{"category": "WORK", "confidence": 0.9}"#.to_string(),
            observer: None,
        }
    }

    /// Succeed for the first `n` calls, then return errors
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Answers consumed in order before falling back to the default
    pub fn with_responses(self, responses: &[&str]) -> Self {
        *self.responses.lock().unwrap() = responses.iter().rev().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_default_response(mut self, text: &str) -> Self {
        self.default_response = text.to_string();
        self
    }

    /// Record the newest classify_runs row during each listed call (1-based)
    pub fn observing_audit(mut self, pool: &SqlitePool, on_calls: &[usize]) -> Self {
        self.observer = Some(AuditObserver {
            pool: pool.clone(),
            on_calls: on_calls.to_vec(),
            seen: Mutex::new(Vec::new()),
        });
        self
    }

    pub fn audit_snapshots(&self) -> Vec<AuditSnapshot> {
        self.observer
            .as_ref()
            .map(|o| o.seen.lock().unwrap().clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider(&self) -> &str {
        MOCK_PROVIDER
    }

    async fn call(&self, _request: &LlmRequest, _api_key: &str) -> anyhow::Result<AdapterResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(observer) = &self.observer {
            if observer.on_calls.contains(&(n + 1)) {
                let (processed_atoms, status): (i64, String) = sqlx::query_as(
                    "SELECT processed_atoms, status FROM classify_runs ORDER BY started_at DESC LIMIT 1",
                )
                .fetch_one(&observer.pool)
                .await?;
                observer.seen.lock().unwrap().push(AuditSnapshot {
                    call: n + 1,
                    processed_atoms,
                    status,
                });
            }
        }
        if let Some(limit) = self.fail_after {
            if n >= limit {
                anyhow::bail!("simulated upstream outage on call {}", n + 1);
            }
        }
        let text = self
            .responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| self.default_response.clone());
        Ok(AdapterResponse {
            text,
            tokens_in: 100,
            tokens_out: 20,
            raw: serde_json::json!({ "mock": true }),
        })
    }
}

/// Real-mode client wired to the scripted adapter.
/// Priced at $1/M input and $2/M output, so each call costs $0.00014.
pub fn mock_client(adapter: Arc<ScriptedAdapter>) -> LlmClient {
    let pricing =
        PricingBook::builtin().with_rate(MOCK_PROVIDER, MOCK_MODEL, ModelRate::new(1.0, 2.0));
    LlmClient::new(
        LlmMode::Real,
        pricing,
        ApiKeys::empty().with_key(MOCK_PROVIDER, "test-key"),
    )
    .with_adapter(adapter)
}
