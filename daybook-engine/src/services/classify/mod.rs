//! Batch classification with an audit trail
//!
//! Every invocation writes one `classify_runs` row. Preconditions are checked
//! before the row exists; after that, any failure is recorded on the row
//! (partial counters plus a capped error payload) before it is returned.
//!
//! Unlabeled atoms are read in stable-id order, one page at a time, with the
//! last stable id as cursor. Existing labels are never overwritten.

mod parse;

pub use parse::{parse_classification, ParsedLabel};

use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::db::{atoms, classify_runs, prompts, spend};
use crate::error::{EngineError, EngineResult};
use crate::llm::{BudgetGuard, LlmClient, LlmRequest, Message, RateLimiter};
use crate::models::{
    Category, ClassifyCounters, ClassifyMode, ClassifyRequest, ClassifyRun, ClassifyStatus,
    MessageAtom, NewLabel, PromptVersion,
};
use daybook_common::db::STUB_CLASSIFY_PROMPT_VERSION;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Stage name a classify prompt version must carry
pub const CLASSIFY_STAGE: &str = "classify";

/// Confidence written on hash-derived labels
pub const STUB_CONFIDENCE: f64 = 0.5;

/// Output allowance for one classification call
pub const CLASSIFY_MAX_OUTPUT_TOKENS: u32 = 128;

#[derive(Clone)]
pub struct ClassifyPipeline {
    pool: SqlitePool,
    llm: Arc<LlmClient>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

/// Per-invocation state threaded through the page loop
struct Progress {
    counters: ClassifyCounters,
    since_checkpoint: u64,
    last_checkpoint: Instant,
}

impl ClassifyPipeline {
    pub fn new(
        pool: SqlitePool,
        llm: Arc<LlmClient>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            pool,
            llm,
            clock,
            settings,
        }
    }

    /// Label every unlabeled atom of a batch for (model, prompt version).
    ///
    /// Returns the finalised audit row. Bad model output for one atom is
    /// counted and skipped; budget, provider and storage failures abort the
    /// invocation and are recorded on the row.
    pub async fn classify_batch(&self, request: &ClassifyRequest) -> EngineResult<ClassifyRun> {
        let prompt = self.validate(request).await?;

        let total_atoms = atoms::count_atoms(&self.pool, &request.batch_id).await?;
        let already_labeled = atoms::count_labels(
            &self.pool,
            &request.batch_id,
            &request.model,
            &request.prompt_version_id,
        )
        .await?;

        let audit = classify_runs::create_classify_run(
            &self.pool,
            &request.batch_id,
            &request.model,
            &request.prompt_version_id,
            request.mode,
            total_atoms,
            already_labeled,
        )
        .await?;

        info!(
            classify_run_id = %audit.id,
            batch_id = %request.batch_id,
            model = %request.model,
            prompt_version = %request.prompt_version_id,
            mode = %request.mode,
            total_atoms,
            already_labeled,
            "Classification started"
        );

        let mut progress = Progress {
            counters: audit.counters.clone(),
            since_checkpoint: 0,
            last_checkpoint: self.clock.now(),
        };

        match self.process(&audit.id, request, &prompt, &mut progress).await {
            Ok(()) => {
                classify_runs::finalize_classify_run(
                    &self.pool,
                    &audit.id,
                    ClassifyStatus::Succeeded,
                    &progress.counters,
                    None,
                )
                .await?;
                info!(
                    classify_run_id = %audit.id,
                    processed = progress.counters.processed_atoms,
                    newly_labeled = progress.counters.newly_labeled,
                    skipped_bad_output = progress.counters.skipped_bad_output,
                    cost_usd = progress.counters.cost_usd,
                    "Classification finished"
                );
            }
            Err(e) => {
                error!(
                    classify_run_id = %audit.id,
                    processed = progress.counters.processed_atoms,
                    code = e.code(),
                    "Classification failed: {}",
                    e
                );
                if let Err(persist_err) = classify_runs::finalize_classify_run(
                    &self.pool,
                    &audit.id,
                    ClassifyStatus::Failed,
                    &progress.counters,
                    Some(&e.to_error_json()),
                )
                .await
                {
                    error!(
                        classify_run_id = %audit.id,
                        "Could not record classification failure: {}",
                        persist_err
                    );
                }
                return Err(e);
            }
        }

        classify_runs::get_classify_run(&self.pool, &audit.id)
            .await?
            .ok_or_else(|| EngineError::Internal(format!("classify run {} vanished", audit.id)))
    }

    /// Checks that must pass before an audit row is written
    async fn validate(&self, request: &ClassifyRequest) -> EngineResult<PromptVersion> {
        if request.model.trim().is_empty() {
            return Err(EngineError::InvalidInput("model must not be empty".into()));
        }

        atoms::get_batch(&self.pool, &request.batch_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("import batch {}", request.batch_id)))?;

        let prompt = prompts::get_prompt_version(&self.pool, &request.prompt_version_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("prompt version {}", request.prompt_version_id))
            })?;

        if request.mode == ClassifyMode::Real {
            validate_real_prompt(&prompt)?;
            self.llm.ensure_ready(&request.provider)?;
        }

        Ok(prompt)
    }

    async fn process(
        &self,
        audit_id: &str,
        request: &ClassifyRequest,
        prompt: &PromptVersion,
        progress: &mut Progress,
    ) -> EngineResult<()> {
        // Limiter and budget are scoped to this invocation
        let limiter = RateLimiter::new(self.settings.min_delay_ms, self.clock.clone());
        let mut budget = BudgetGuard::new(
            request.budget.unwrap_or(self.settings.budget),
            0.0,
            spend::day_spend_usd(&self.pool, &spend::today()).await?,
        );

        let mut cursor: Option<String> = None;
        loop {
            let page = atoms::page_unlabeled_atoms(
                &self.pool,
                &request.batch_id,
                &request.model,
                &request.prompt_version_id,
                cursor.as_deref(),
                self.settings.classify_page_size,
            )
            .await?;

            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.stable_id.clone());
            debug!(classify_run_id = audit_id, atoms = page.len(), "Classifying page");

            match request.mode {
                ClassifyMode::Stub => {
                    self.label_page_stub(request, &page, progress).await?;
                    self.maybe_checkpoint(audit_id, progress).await?;
                }
                ClassifyMode::Real => {
                    for atom in &page {
                        self.label_atom_real(request, prompt, atom, &limiter, &mut budget, progress)
                            .await?;
                        self.maybe_checkpoint(audit_id, progress).await?;
                    }
                }
            }
        }

        Ok(())
    }

    async fn label_page_stub(
        &self,
        request: &ClassifyRequest,
        page: &[MessageAtom],
        progress: &mut Progress,
    ) -> EngineResult<()> {
        let labels: Vec<NewLabel> = page
            .iter()
            .map(|atom| NewLabel {
                atom_id: atom.id.clone(),
                category: Category::from_seed(&atom.stable_id),
                confidence: STUB_CONFIDENCE,
            })
            .collect();

        let inserted =
            atoms::insert_labels(&self.pool, &request.model, &request.prompt_version_id, &labels)
                .await?;

        let counters = &mut progress.counters;
        let page_len = page.len() as u64;
        counters.processed_atoms += page_len;
        counters.newly_labeled += inserted;
        counters.labeled_total += inserted;
        // Rows that lost the insert race were labeled by a concurrent invocation
        counters.skipped_already_labeled += page_len - inserted;
        counters.last_atom_stable_id_processed = page.last().map(|a| a.stable_id.clone());
        progress.since_checkpoint += page_len;
        Ok(())
    }

    async fn label_atom_real(
        &self,
        request: &ClassifyRequest,
        prompt: &PromptVersion,
        atom: &MessageAtom,
        limiter: &RateLimiter,
        budget: &mut BudgetGuard,
        progress: &mut Progress,
    ) -> EngineResult<()> {
        let llm_request = LlmRequest::new(
            request.provider.as_str(),
            request.model.as_str(),
            vec![
                Message::system(prompt.template_text.clone()),
                Message::user(atom.text.clone()),
            ],
        )
        .with_max_output_tokens(CLASSIFY_MAX_OUTPUT_TOKENS)
        .with_temperature(0.0)
        .for_classification(Some(atom.stable_id.clone()));

        if budget.policy().has_caps() {
            budget.check(self.llm.estimate_call_cost(&llm_request)?)?;
        }

        limiter.acquire().await;
        let response = self.llm.call(&llm_request).await?;
        budget.record(response.cost_usd);

        let counters = &mut progress.counters;
        counters.tokens_in += response.tokens_in;
        counters.tokens_out += response.tokens_out;
        counters.cost_usd += response.cost_usd;

        match parse_classification(&response.text) {
            Ok(parsed) => {
                let label = NewLabel {
                    atom_id: atom.id.clone(),
                    category: parsed.category,
                    confidence: parsed.confidence,
                };
                let inserted = atoms::insert_labels(
                    &self.pool,
                    &request.model,
                    &request.prompt_version_id,
                    std::slice::from_ref(&label),
                )
                .await?;
                if parsed.aliased {
                    counters.aliased_count += 1;
                }
                if inserted == 1 {
                    counters.newly_labeled += 1;
                    counters.labeled_total += 1;
                } else {
                    counters.skipped_already_labeled += 1;
                }
            }
            Err(e) if e.is_bad_output() => {
                warn!(atom = %atom.stable_id, "Skipping atom: {}", e);
                counters.skipped_bad_output += 1;
            }
            Err(e) => return Err(e),
        }

        counters.processed_atoms += 1;
        counters.last_atom_stable_id_processed = Some(atom.stable_id.clone());
        progress.since_checkpoint += 1;
        Ok(())
    }

    /// Persist counters once enough atoms or enough time has passed
    async fn maybe_checkpoint(&self, audit_id: &str, progress: &mut Progress) -> EngineResult<()> {
        let now = self.clock.now();
        let due = progress.since_checkpoint >= self.settings.checkpoint_every_atoms
            || now.saturating_duration_since(progress.last_checkpoint)
                >= self.settings.checkpoint_interval;
        if !due || progress.since_checkpoint == 0 {
            return Ok(());
        }

        classify_runs::checkpoint_classify_run(&self.pool, audit_id, &progress.counters).await?;
        debug!(
            classify_run_id = audit_id,
            processed = progress.counters.processed_atoms,
            "Classification checkpoint"
        );
        progress.since_checkpoint = 0;
        progress.last_checkpoint = now;
        Ok(())
    }
}

/// A real-mode prompt must be a classify prompt other than the stub marker
/// and must ask for both output fields
fn validate_real_prompt(prompt: &PromptVersion) -> EngineResult<()> {
    if prompt.stage != CLASSIFY_STAGE {
        return Err(EngineError::InvalidInput(format!(
            "prompt version {} belongs to stage '{}', not '{}'",
            prompt.id, prompt.stage, CLASSIFY_STAGE
        )));
    }
    if prompt.id == STUB_CLASSIFY_PROMPT_VERSION {
        return Err(EngineError::InvalidInput(format!(
            "prompt version {} is reserved for stub classification",
            prompt.id
        )));
    }
    let template = prompt.template_text.to_lowercase();
    if !template.contains("category") || !template.contains("confidence") {
        return Err(EngineError::InvalidInput(format!(
            "prompt version {} must ask for both \"category\" and \"confidence\"",
            prompt.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(id: &str, stage: &str, template: &str) -> PromptVersion {
        PromptVersion {
            id: id.into(),
            stage: stage.into(),
            template_text: template.into(),
        }
    }

    #[test]
    fn test_real_prompt_must_be_classify_stage() {
        let err = validate_real_prompt(&prompt(
            "summarize_v1",
            "summarize",
            "category confidence",
        ))
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn test_stub_prompt_rejected_in_real_mode() {
        let err = validate_real_prompt(&prompt(
            STUB_CLASSIFY_PROMPT_VERSION,
            CLASSIFY_STAGE,
            "category confidence",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_prompt_must_mention_both_fields() {
        assert!(validate_real_prompt(&prompt("c2", CLASSIFY_STAGE, "Return the category")).is_err());
        assert!(validate_real_prompt(&prompt(
            "c2",
            CLASSIFY_STAGE,
            "Return JSON {\"Category\": ..., \"Confidence\": ...}"
        ))
        .is_ok());
    }
}
