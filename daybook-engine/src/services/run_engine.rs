//! Run/Job execution engine
//!
//! A Run is a set of per-day summarize Jobs. `tick` processes a bounded number
//! of QUEUED Jobs sequentially under the Run's advisory lock; the control
//! operations (`resume`, `cancel`, `reset_job`) move Jobs between states.
//!
//! Run state machine:
//! QUEUED → RUNNING → COMPLETED | FAILED, CANCELLED from any non-terminal
//! state. CANCELLED is absorbing.
//!
//! Job state machine:
//! QUEUED → RUNNING → SUCCEEDED | FAILED, or CANCELLED. Status updates are
//! guarded on the expected prior state, so a cancel landing while a model call
//! is in flight wins over the tick that issued the call.

use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::db::jobs::{self, JobUsage};
use crate::db::outputs::NewOutput;
use crate::db::{prompts, runs, spend};
use crate::error::{EngineError, EngineResult};
use crate::llm::{estimate_tokens, BudgetGuard, LlmClient, LlmRequest, Message, RateLimiter};
use crate::models::{
    CancelResult, Job, PromptVersion, ResetJobResult, ResumeResult, Run, RunStatus, TickResult,
    SUMMARIZE_STAGE,
};
use crate::services::advisory_lock::AdvisoryLockService;
use crate::services::bundle_builder::BundleBuilder;
use crate::services::bundle_hasher::{bundle_context_hash, bundle_hash, BundleContext};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Executes and controls Runs
#[derive(Clone)]
pub struct RunEngine {
    pool: SqlitePool,
    llm: Arc<LlmClient>,
    bundles: Arc<dyn BundleBuilder>,
    locks: AdvisoryLockService,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

/// What happened to one job inside a tick
enum JobOutcome {
    Succeeded,
    Failed { stop_tick: bool },
    /// Cancelled underneath us; nothing written
    Skipped,
}

impl RunEngine {
    pub fn new(
        pool: SqlitePool,
        llm: Arc<LlmClient>,
        bundles: Arc<dyn BundleBuilder>,
        locks: AdvisoryLockService,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            pool,
            llm,
            bundles,
            locks,
            clock,
            settings,
        }
    }

    /// Process up to `max_jobs` QUEUED jobs of a run.
    ///
    /// Fails with `TickInProgress` if another tick holds the run. On a
    /// COMPLETED or CANCELLED run, does nothing and reports the status.
    pub async fn tick(&self, run_id: &str, max_jobs: u32) -> EngineResult<TickResult> {
        if max_jobs == 0 {
            return Err(EngineError::InvalidInput("max_jobs must be at least 1".into()));
        }
        self.locks
            .with_lock(run_id, || self.tick_locked(run_id, max_jobs))
            .await
    }

    async fn tick_locked(&self, run_id: &str, max_jobs: u32) -> EngineResult<TickResult> {
        let run = self.load_run(run_id).await?;

        let mut result = TickResult {
            run_id: run_id.to_string(),
            status: run.status,
            jobs_processed: 0,
            succeeded: 0,
            failed: 0,
            remaining: 0,
        };

        if run.status.is_terminal() {
            result.remaining = jobs::count_jobs_by_status(&self.pool, run_id).await?.queued;
            debug!(run_id, status = %run.status, "Tick on terminal run, nothing to do");
            return Ok(result);
        }

        let stranded = jobs::requeue_stranded_jobs(&self.pool, run_id).await?;
        if stranded > 0 {
            warn!(run_id, stranded, "Requeued jobs left RUNNING by an interrupted tick");
        }

        let queued = jobs::next_queued_jobs(&self.pool, run_id, max_jobs).await?;
        if queued.is_empty() {
            result.status = self.settle_run_status(run_id).await?;
            return Ok(result);
        }

        // Preconditions checked before any job changes state
        self.llm.ensure_ready(&run.config.provider)?;
        let prompt = prompts::get_prompt_version(&self.pool, &run.config.prompt_version_ids.summarize)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "prompt version {}",
                    run.config.prompt_version_ids.summarize
                ))
            })?;

        runs::mark_run_running(&self.pool, run_id).await?;

        let limiter = RateLimiter::new(self.settings.min_delay_ms, self.clock.clone());
        let mut budget = BudgetGuard::new(
            self.settings.budget,
            spend::run_spend_usd(&self.pool, run_id).await?,
            spend::day_spend_usd(&self.pool, &spend::today()).await?,
        );

        info!(run_id, jobs = queued.len(), "Tick started");

        for job in &queued {
            if runs::get_run_status(&self.pool, run_id).await? == Some(RunStatus::Cancelled) {
                info!(run_id, "Run cancelled during tick, stopping");
                break;
            }
            if !jobs::mark_job_running(&self.pool, &job.id).await? {
                continue;
            }
            result.jobs_processed += 1;

            match self.run_job(&run, job, &prompt, &limiter, &mut budget).await? {
                JobOutcome::Succeeded => result.succeeded += 1,
                JobOutcome::Failed { stop_tick } => {
                    result.failed += 1;
                    if stop_tick {
                        break;
                    }
                }
                JobOutcome::Skipped => {}
            }
        }

        runs::refresh_run_totals(&self.pool, run_id).await?;
        result.status = self.settle_run_status(run_id).await?;
        result.remaining = jobs::count_jobs_by_status(&self.pool, run_id).await?.queued;

        info!(
            run_id,
            processed = result.jobs_processed,
            succeeded = result.succeeded,
            failed = result.failed,
            remaining = result.remaining,
            status = %result.status,
            "Tick finished"
        );
        Ok(result)
    }

    /// Execute one RUNNING job and persist its outcome. Only a failure to
    /// record the outcome itself is returned as an error.
    async fn run_job(
        &self,
        run: &Run,
        job: &Job,
        prompt: &PromptVersion,
        limiter: &RateLimiter,
        budget: &mut BudgetGuard,
    ) -> EngineResult<JobOutcome> {
        match self.summarize_day(run, job, prompt, limiter, budget).await {
            Ok(true) => {
                debug!(run_id = %run.id, day = %job.day_date, "Job succeeded");
                Ok(JobOutcome::Succeeded)
            }
            Ok(false) => {
                info!(run_id = %run.id, day = %job.day_date, "Job cancelled before completion");
                Ok(JobOutcome::Skipped)
            }
            Err(e) => {
                warn!(run_id = %run.id, day = %job.day_date, code = e.code(), "Job failed: {}", e);
                let message = format!("{}: {}", e.code(), e);
                if !jobs::fail_job(&self.pool, &job.id, &message).await? {
                    return Ok(JobOutcome::Skipped);
                }
                // Later jobs would hit the same cap
                let stop_tick = matches!(e, EngineError::BudgetExceeded { .. });
                Ok(JobOutcome::Failed { stop_tick })
            }
        }
    }

    /// Build, hash and summarize one day. Returns false if the job stopped
    /// being RUNNING before its output could be written.
    async fn summarize_day(
        &self,
        run: &Run,
        job: &Job,
        prompt: &PromptVersion,
        limiter: &RateLimiter,
        budget: &mut BudgetGuard,
    ) -> EngineResult<bool> {
        let config = &run.config;
        let bundle = self
            .bundles
            .build(
                &run.import_batch_id,
                &job.day_date,
                &config.sources,
                &config.label_spec,
                &config.filter_profile,
            )
            .await?;

        let estimated_tokens = estimate_tokens(&bundle.bundle_text);
        if estimated_tokens > config.max_input_tokens {
            return Err(EngineError::InvalidInput(format!(
                "bundle for {} is ~{} tokens, over the run limit of {}",
                job.day_date, estimated_tokens, config.max_input_tokens
            )));
        }

        let hash = bundle_hash(&bundle.bundle_text);
        let context_hash = bundle_context_hash(&BundleContext {
            batch_id: &run.import_batch_id,
            day_date: &job.day_date,
            sources: &config.sources,
            filter_profile: &config.filter_profile,
            label_spec: &config.label_spec,
        })?;

        let request = LlmRequest::new(
            config.provider.as_str(),
            config.model.as_str(),
            vec![
                Message::system(prompt.template_text.clone()),
                Message::user(bundle.bundle_text.clone()),
            ],
        )
        .with_max_output_tokens(self.settings.summarize_max_output_tokens);

        if budget.policy().has_caps() {
            budget.check(self.llm.estimate_call_cost(&request)?)?;
        }

        limiter.acquire().await;
        let response = self.llm.call(&request).await?;
        budget.record(response.cost_usd);

        let output = NewOutput {
            stage: SUMMARIZE_STAGE.to_string(),
            output_text: response.text.clone(),
            output_json: json!({
                "dayDate": job.day_date,
                "attempt": job.attempt,
                "atomCount": bundle.atom_count,
                "atomStableIds": bundle.atom_stable_ids,
                "provider": response.provider,
                "dryRun": response.dry_run,
                "tokensIn": response.tokens_in,
                "tokensOut": response.tokens_out,
                "costUsd": response.cost_usd,
            }),
            model: config.model.clone(),
            prompt_version_id: prompt.id.clone(),
            bundle_hash: hash,
            bundle_context_hash: context_hash,
        };

        let usage = JobUsage {
            tokens_in: response.tokens_in,
            tokens_out: response.tokens_out,
            cost_usd: response.cost_usd,
        };
        Ok(jobs::complete_job(&self.pool, &job.id, usage, &output).await?)
    }

    /// Derive the aggregate status from job counts and store it.
    ///
    /// Open jobs keep the run RUNNING; otherwise any FAILED job makes it
    /// FAILED, else COMPLETED. A CANCELLED run stays CANCELLED.
    async fn settle_run_status(&self, run_id: &str) -> EngineResult<RunStatus> {
        let current = runs::get_run_status(&self.pool, run_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("run {}", run_id)))?;
        if current == RunStatus::Cancelled {
            return Ok(current);
        }

        let counts = jobs::count_jobs_by_status(&self.pool, run_id).await?;
        let status = if counts.open() > 0 {
            RunStatus::Running
        } else if counts.failed > 0 {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        if status != current {
            runs::set_run_status(&self.pool, run_id, status).await?;
        }
        Ok(status)
    }

    /// Requeue FAILED jobs. A no-op when none failed.
    pub async fn resume(&self, run_id: &str) -> EngineResult<ResumeResult> {
        let run = self.load_run(run_id).await?;
        if run.status == RunStatus::Cancelled {
            return Err(EngineError::CannotResumeCancelled {
                run_id: run_id.to_string(),
            });
        }

        let requeued = runs::requeue_failed_jobs(&self.pool, run_id).await?;
        let status = runs::get_run_status(&self.pool, run_id)
            .await?
            .unwrap_or(run.status);

        info!(run_id, requeued, status = %status, "Run resumed");
        Ok(ResumeResult {
            run_id: run_id.to_string(),
            jobs_requeued: requeued as u32,
            status,
        })
    }

    /// Cancel the run and its open jobs. Idempotent on a cancelled run.
    pub async fn cancel(&self, run_id: &str) -> EngineResult<CancelResult> {
        let run = self.load_run(run_id).await?;
        match run.status {
            RunStatus::Completed => {
                return Err(EngineError::AlreadyCompleted {
                    run_id: run_id.to_string(),
                })
            }
            RunStatus::Cancelled => {
                return Ok(CancelResult {
                    run_id: run_id.to_string(),
                    jobs_cancelled: 0,
                    status: RunStatus::Cancelled,
                })
            }
            RunStatus::Queued | RunStatus::Running | RunStatus::Failed => {}
        }

        let cancelled = runs::cancel_run(&self.pool, run_id).await?;
        info!(run_id, cancelled, "Run cancelled");
        Ok(CancelResult {
            run_id: run_id.to_string(),
            jobs_cancelled: cancelled as u32,
            status: RunStatus::Cancelled,
        })
    }

    /// Discard a day's output and queue it again with a bumped attempt
    pub async fn reset_job(&self, run_id: &str, day_date: &str) -> EngineResult<ResetJobResult> {
        let run = self.load_run(run_id).await?;
        let job = jobs::get_job_by_day(&self.pool, run_id, day_date)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("job for day {} in run {}", day_date, run_id))
            })?;

        if run.status == RunStatus::Cancelled {
            return Err(EngineError::CannotResetCancelled {
                run_id: run_id.to_string(),
            });
        }

        // Re-checked inside the transaction in case a cancel landed since load_run
        let (attempt, outputs_deleted) = runs::reset_job(&self.pool, run_id, &job.id)
            .await?
            .ok_or_else(|| EngineError::CannotResetCancelled {
                run_id: run_id.to_string(),
            })?;
        runs::refresh_run_totals(&self.pool, run_id).await?;

        info!(run_id, day = day_date, attempt, outputs_deleted, "Job reset");
        Ok(ResetJobResult {
            run_id: run_id.to_string(),
            day_date: day_date.to_string(),
            attempt,
            outputs_deleted: outputs_deleted as u32,
        })
    }

    async fn load_run(&self, run_id: &str) -> EngineResult<Run> {
        runs::get_run(&self.pool, run_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("run {}", run_id)))
    }
}
