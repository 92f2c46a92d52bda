//! Spend caps
//!
//! `assert_within_budget` is the pure check. `BudgetGuard` carries the spend
//! counters for one execution scope (a tick or a classify invocation): the
//! day baseline is read once at scope start and the scope's own running cost is
//! added on top.

use crate::error::{EngineError, EngineResult, LimitType};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Per-run and per-day USD caps; `None` means uncapped
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetPolicy {
    pub max_usd_per_run: Option<f64>,
    pub max_usd_per_day: Option<f64>,
}

impl BudgetPolicy {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn has_caps(&self) -> bool {
        self.max_usd_per_run.is_some() || self.max_usd_per_day.is_some()
    }
}

/// Fail if `next_cost_usd` would push either counter past its cap.
///
/// Both caps are evaluated on every call. When both are breached the error
/// reports per_run and the per_day breach is only logged at debug level.
pub fn assert_within_budget(
    next_cost_usd: f64,
    spent_usd_per_run: f64,
    spent_usd_per_day: f64,
    policy: &BudgetPolicy,
) -> EngineResult<()> {
    let run_breach = breach(LimitType::PerRun, policy.max_usd_per_run, spent_usd_per_run, next_cost_usd);
    let day_breach = breach(LimitType::PerDay, policy.max_usd_per_day, spent_usd_per_day, next_cost_usd);

    match (run_breach, day_breach) {
        (Some(run), Some(day)) => {
            debug!("Per-day cap also exceeded: {}", day);
            Err(run)
        }
        (Some(err), None) | (None, Some(err)) => Err(err),
        (None, None) => Ok(()),
    }
}

fn breach(
    limit_type: LimitType,
    limit: Option<f64>,
    spent_usd: f64,
    next_cost_usd: f64,
) -> Option<EngineError> {
    let limit_usd = limit?;
    (spent_usd + next_cost_usd > limit_usd).then_some(EngineError::BudgetExceeded {
        limit_type,
        limit_usd,
        spent_usd,
        next_cost_usd,
    })
}

/// Spend counters for one execution scope
#[derive(Debug, Clone)]
pub struct BudgetGuard {
    policy: BudgetPolicy,
    spent_run: f64,
    day_baseline: f64,
    spent_scope: f64,
}

impl BudgetGuard {
    /// `spent_run` is the run's cost so far; `day_baseline` the day's cost so far
    pub fn new(policy: BudgetPolicy, spent_run: f64, day_baseline: f64) -> Self {
        Self {
            policy,
            spent_run,
            day_baseline,
            spent_scope: 0.0,
        }
    }

    pub fn policy(&self) -> &BudgetPolicy {
        &self.policy
    }

    pub fn spent_run(&self) -> f64 {
        self.spent_run
    }

    pub fn spent_day(&self) -> f64 {
        self.day_baseline + self.spent_scope
    }

    pub fn check(&self, next_cost_usd: f64) -> EngineResult<()> {
        assert_within_budget(next_cost_usd, self.spent_run, self.spent_day(), &self.policy)
    }

    /// Add a completed call's actual cost to both counters
    pub fn record(&mut self, cost_usd: f64) {
        self.spent_run += cost_usd;
        self.spent_scope += cost_usd;
    }
}
