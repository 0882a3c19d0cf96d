//! Suite runner: one browser context per plan, global cleanup at the end

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::accounts::AccountTable;
use crate::artifacts::ArtifactStore;
use crate::cleanup::CleanupManager;
use crate::config::HarnessConfig;
use crate::datalayer::DataLayer;
use crate::driver::DriverFactory;
use crate::error::{HarnessError, HarnessResult};
use crate::plan::{Category, SuitePlan};
use crate::scenarios::{run_scenario, ScenarioContext, ScenarioReport};

pub const RESULTS_FILE: &str = "test-results.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed(String),
    /// The environment had nothing to test, or a check could not be made
    Skipped(String),
    /// Diagnostic plans report, they never pass or fail
    Diagnostic,
}

/// Result of running a single plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub name: String,
    pub category: Category,
    pub outcome: Outcome,
    pub duration_ms: u64,
    pub scenarios: Vec<ScenarioReport>,
}

impl PlanResult {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }
}

/// Result of running all plans
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub diagnostic: usize,
    pub duration_ms: u64,
    /// Test users removed by the final sweep
    pub cleaned_up: usize,
    pub results: Vec<PlanResult>,
}

impl SuiteResult {
    fn tally(results: Vec<PlanResult>, duration_ms: u64, cleaned_up: usize) -> Self {
        let count = |f: fn(&Outcome) -> bool| results.iter().filter(|r| f(&r.outcome)).count();
        Self {
            total: results.len(),
            passed: count(|o| matches!(o, Outcome::Passed)),
            failed: count(|o| matches!(o, Outcome::Failed(_))),
            skipped: count(|o| matches!(o, Outcome::Skipped(_))),
            diagnostic: count(|o| matches!(o, Outcome::Diagnostic)),
            duration_ms,
            cleaned_up,
            results,
        }
    }

    /// 0 when nothing failed, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 {
            0
        } else {
            1
        }
    }
}

/// Configuration for the suite runner
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    pub harness: HarnessConfig,
    /// Only plans carrying this tag
    pub tag: Option<String>,
    /// Only the plan with this name
    pub plan: Option<String>,
    /// Also run diagnostic plans
    pub include_diagnostics: bool,
}

pub struct SuiteRunner {
    config: RunnerConfig,
    factory: Arc<dyn DriverFactory>,
    data: Arc<dyn DataLayer>,
    accounts: AccountTable,
    cleanup: CleanupManager,
}

impl SuiteRunner {
    pub fn new(
        config: RunnerConfig,
        factory: Arc<dyn DriverFactory>,
        data: Arc<dyn DataLayer>,
        accounts: AccountTable,
    ) -> Self {
        let cleanup = CleanupManager::new(data.clone(), &config.harness.cleanup_email_prefix);
        Self {
            config,
            factory,
            data,
            accounts,
            cleanup,
        }
    }

    pub fn cleanup(&self) -> &CleanupManager {
        &self.cleanup
    }

    /// Load plans from the configured directory and run the selected ones
    pub async fn run_all(&self) -> HarnessResult<SuiteResult> {
        let plans = SuitePlan::load_all(&self.config.harness.plans_dir)?;
        let selected = self.select(&plans)?;
        self.run_plans(&selected).await
    }

    /// Apply the name, tag and category filters
    pub fn select(&self, plans: &[SuitePlan]) -> HarnessResult<Vec<SuitePlan>> {
        if let Some(name) = &self.config.plan {
            return plans
                .iter()
                .find(|p| &p.name == name)
                .cloned()
                .map(|p| vec![p])
                .ok_or_else(|| HarnessError::PlanParse(format!("Plan not found: {name}")));
        }
        let tagged: Vec<&SuitePlan> = match &self.config.tag {
            Some(tag) => SuitePlan::filter_by_tag(plans, tag),
            None => plans.iter().collect(),
        };
        Ok(tagged
            .into_iter()
            .filter(|p| self.config.include_diagnostics || p.category == Category::Regression)
            .cloned()
            .collect())
    }

    /// Serial plans run first, in order; the rest run concurrently up to
    /// `max_parallel`. Test users are swept afterwards regardless.
    pub async fn run_plans(&self, plans: &[SuitePlan]) -> HarnessResult<SuiteResult> {
        let start = Instant::now();
        let artifacts = ArtifactStore::new(&self.config.harness.results_dir)?;

        info!("Running {} plan(s)...", plans.len());

        let (serial, parallel): (Vec<_>, Vec<_>) =
            plans.iter().enumerate().partition(|(_, p)| p.serial);

        let mut indexed = Vec::with_capacity(plans.len());
        for (index, plan) in serial {
            indexed.push((index, self.run_plan(plan, &artifacts).await));
        }

        let max_parallel = self.config.harness.max_parallel.max(1);
        let concurrent: Vec<(usize, PlanResult)> = stream::iter(parallel)
            .map(|(index, plan)| {
                let artifacts = &artifacts;
                async move { (index, self.run_plan(plan, artifacts).await) }
            })
            .buffer_unordered(max_parallel)
            .collect()
            .await;
        indexed.extend(concurrent);
        indexed.sort_by_key(|(index, _)| *index);
        let results: Vec<PlanResult> = indexed.into_iter().map(|(_, r)| r).collect();

        let cleaned_up = match self.cleanup.global_cleanup().await {
            Ok(n) => n,
            Err(e) => {
                warn!("Global cleanup failed: {}", e);
                0
            }
        };
        if let Err(e) = artifacts.write_manifest() {
            warn!("Could not write artifact manifest: {}", e);
        }

        let suite = SuiteResult::tally(results, start.elapsed().as_millis() as u64, cleaned_up);

        info!("");
        info!(
            "Suite Results: {} passed, {} failed, {} skipped, {} diagnostic ({} ms)",
            suite.passed, suite.failed, suite.skipped, suite.diagnostic, suite.duration_ms
        );
        Ok(suite)
    }

    /// Run one plan in its own browser context
    pub async fn run_plan(&self, plan: &SuitePlan, artifacts: &ArtifactStore) -> PlanResult {
        let start = Instant::now();
        debug!("Running plan: {}", plan.name);

        let mut scenarios = Vec::with_capacity(plan.steps.len());
        let outcome = match self.factory.create().await {
            Ok(driver) => {
                let ctx = ScenarioContext {
                    driver: driver.as_ref(),
                    data: self.data.as_ref(),
                    accounts: &self.accounts,
                    cleanup: &self.cleanup,
                    artifacts: Some(artifacts),
                    config: &self.config.harness,
                };
                let outcome = run_steps(&ctx, plan, &mut scenarios).await;
                if let Err(e) = driver.close().await {
                    warn!("Closing browser for {} failed: {}", plan.name, e);
                }
                outcome
            }
            Err(e) => Outcome::Failed(format!("could not start browser: {e}")),
        };

        let result = PlanResult {
            name: plan.name.clone(),
            category: plan.category,
            outcome,
            duration_ms: start.elapsed().as_millis() as u64,
            scenarios,
        };
        match &result.outcome {
            Outcome::Passed => info!("✓ {} ({} ms)", result.name, result.duration_ms),
            Outcome::Failed(reason) => error!("✗ {} - {}", result.name, reason),
            Outcome::Skipped(reason) => warn!("- {} skipped: {}", result.name, reason),
            Outcome::Diagnostic => info!("• {} recorded ({} ms)", result.name, result.duration_ms),
        }
        result
    }

    /// Write suite results to `test-results.json`
    pub fn write_results(&self, results: &SuiteResult) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(&self.config.harness.results_dir)?;

        let path = self.config.harness.results_dir.join(RESULTS_FILE);
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

async fn run_steps(
    ctx: &ScenarioContext<'_>,
    plan: &SuitePlan,
    scenarios: &mut Vec<ScenarioReport>,
) -> Outcome {
    let mut unverified = None;
    for (i, step) in plan.steps.iter().enumerate() {
        let label = format!("{}-{}-{}", plan.name, i + 1, step.name());
        let result = match AssertUnwindSafe(run_scenario(ctx, step, &label))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                return Outcome::Failed(format!("{} panicked: {message}", step.name()));
            }
        };
        scenarios.push(result.report);

        if let Some(e) = result.error {
            let reason = format!("{}: {e}", step.name());
            if plan.category == Category::Diagnostic {
                warn!("{}", reason);
                return Outcome::Diagnostic;
            }
            // Later steps can still fail the plan
            if matches!(e, HarnessError::Unverified(_)) {
                warn!("{}", reason);
                unverified.get_or_insert(reason);
                continue;
            }
            return if e.is_skip() || e.is_unsupported() {
                Outcome::Skipped(reason)
            } else {
                Outcome::Failed(reason)
            };
        }
    }

    match (plan.category, unverified) {
        (Category::Diagnostic, _) => Outcome::Diagnostic,
        (Category::Regression, Some(reason)) => Outcome::Skipped(reason),
        (Category::Regression, None) => Outcome::Passed,
    }
}
