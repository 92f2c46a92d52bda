//! daybook-engine library interface
//!
//! `Engine` is the caller-facing entry point: run control (`tick`, `resume`,
//! `cancel`, `reset_job`), batch classification, and read accessors. The CLI
//! binary and the integration tests drive the engine through it.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::clock::{Clock, FakeClock, SystemClock};
pub use crate::config::{ApiKeys, EngineSettings};
pub use crate::error::{EngineError, EngineResult};

use crate::llm::{LlmClient, PricingBook};
use crate::models::{
    CancelResult, ClassifyRequest, ClassifyRun, Job, Output, ResetJobResult, ResumeResult, Run,
    RunConfig, TickResult, SUMMARIZE_STAGE,
};
use crate::services::{
    AdvisoryLockService, BundleBuilder, ClassifyPipeline, RunEngine, SqliteBundleBuilder,
};
use daybook_common::config::TomlConfig;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

/// Execution engine over one daybook database
#[derive(Clone)]
pub struct Engine {
    pool: SqlitePool,
    runs: RunEngine,
    classifier: ClassifyPipeline,
}

impl Engine {
    /// Start building an engine; unset collaborators get production defaults
    pub fn builder(pool: SqlitePool) -> EngineBuilder {
        EngineBuilder {
            pool,
            llm: None,
            bundles: None,
            clock: None,
            settings: EngineSettings::default(),
        }
    }

    /// Engine configured from TOML and environment
    ///
    /// Resolves settings, API keys and pricing overrides, and registers the
    /// built-in HTTP adapters.
    pub fn from_config(pool: SqlitePool, toml_config: &TomlConfig) -> EngineResult<Self> {
        let settings = EngineSettings::from_toml(toml_config)?;
        let mut pricing = PricingBook::builtin();
        pricing.apply_overrides(&toml_config.pricing)?;
        let api_keys = ApiKeys::resolve(toml_config);

        info!(mode = %settings.llm_mode, ?api_keys, "LLM client configured");

        let llm = LlmClient::new(settings.llm_mode, pricing, api_keys).with_builtin_adapters()?;
        Ok(Self::builder(pool)
            .with_llm(Arc::new(llm))
            .with_settings(settings)
            .build())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a run with one QUEUED job per day. With no days given, every
    /// day present in the batch is scheduled.
    pub async fn create_run(
        &self,
        batch_id: &str,
        config: &RunConfig,
        days: Option<&[String]>,
    ) -> EngineResult<Run> {
        db::atoms::get_batch(&self.pool, batch_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("import batch {}", batch_id)))?;

        let days = match days {
            Some(days) => days.to_vec(),
            None => db::atoms::list_days(&self.pool, batch_id).await?,
        };
        let run = db::runs::create_run(&self.pool, batch_id, config, &days).await?;
        info!(run_id = %run.id, batch_id, days = days.len(), "Run created");
        Ok(run)
    }

    pub async fn tick(&self, run_id: &str, max_jobs: u32) -> EngineResult<TickResult> {
        self.runs.tick(run_id, max_jobs).await
    }

    pub async fn resume(&self, run_id: &str) -> EngineResult<ResumeResult> {
        self.runs.resume(run_id).await
    }

    pub async fn cancel(&self, run_id: &str) -> EngineResult<CancelResult> {
        self.runs.cancel(run_id).await
    }

    pub async fn reset_job(&self, run_id: &str, day_date: &str) -> EngineResult<ResetJobResult> {
        self.runs.reset_job(run_id, day_date).await
    }

    pub async fn classify_batch(&self, request: &ClassifyRequest) -> EngineResult<ClassifyRun> {
        self.classifier.classify_batch(request).await
    }

    pub async fn get_run(&self, run_id: &str) -> EngineResult<Run> {
        db::runs::get_run(&self.pool, run_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("run {}", run_id)))
    }

    pub async fn list_jobs(&self, run_id: &str) -> EngineResult<Vec<Job>> {
        self.get_run(run_id).await?;
        Ok(db::jobs::list_jobs(&self.pool, run_id).await?)
    }

    /// Summary output for one day of a run, if the job has produced one
    pub async fn get_output(&self, run_id: &str, day_date: &str) -> EngineResult<Option<Output>> {
        let job = db::jobs::get_job_by_day(&self.pool, run_id, day_date)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("job for day {} in run {}", day_date, run_id))
            })?;
        Ok(db::outputs::get_output(&self.pool, &job.id, SUMMARIZE_STAGE).await?)
    }

    pub async fn get_classify_run(&self, id: &str) -> EngineResult<ClassifyRun> {
        db::classify_runs::get_classify_run(&self.pool, id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("classify run {}", id)))
    }

    pub async fn list_classify_runs(&self, batch_id: &str) -> EngineResult<Vec<ClassifyRun>> {
        Ok(db::classify_runs::list_classify_runs(&self.pool, batch_id).await?)
    }
}

/// Collaborator overrides for `Engine`
pub struct EngineBuilder {
    pool: SqlitePool,
    llm: Option<Arc<LlmClient>>,
    bundles: Option<Arc<dyn BundleBuilder>>,
    clock: Option<Arc<dyn Clock>>,
    settings: EngineSettings,
}

impl EngineBuilder {
    pub fn with_llm(mut self, llm: Arc<LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_bundle_builder(mut self, bundles: Arc<dyn BundleBuilder>) -> Self {
        self.bundles = Some(bundles);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Engine {
        let pool = self.pool;
        let llm = self.llm.unwrap_or_else(|| Arc::new(LlmClient::dry_run()));
        let bundles = self
            .bundles
            .unwrap_or_else(|| Arc::new(SqliteBundleBuilder::new(pool.clone())));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let locks = AdvisoryLockService::new(pool.clone(), self.settings.lock_stale_after);

        let runs = RunEngine::new(
            pool.clone(),
            llm.clone(),
            bundles,
            locks,
            clock.clone(),
            self.settings.clone(),
        );
        let classifier = ClassifyPipeline::new(pool.clone(), llm, clock, self.settings);

        Engine {
            pool,
            runs,
            classifier,
        }
    }
}
