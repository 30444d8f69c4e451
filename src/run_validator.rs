#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! End-of-run certification.
//!
//! Blocking checks decide `passed`: full regression, lint, type-check and no
//! orphaned tasks. The import smoke check and the acceptance-criteria
//! coverage summary are recorded but never fail a run.

use crate::db::SwarmDb;
use crate::error::{Result, SwarmError};
use crate::gate::run_checks;
use crate::ports::{CheckTool, CriteriaMatcher, ExportChecker};
use crate::types::{
    CheckResult, CoverageSummary, RunId, RunValidationReport, Task, ValidationCheck,
    ValidationStatus,
};
use itertools::Itertools;
use std::sync::Arc;
use tracing::{info, warn};

/// Tasks whose criteria coverage falls below this are listed in the summary.
pub const LOW_COVERAGE_THRESHOLD: f64 = 0.5;

#[derive(Clone)]
pub struct RunValidator {
    db: SwarmDb,
    tests: Arc<dyn CheckTool>,
    lint: Arc<dyn CheckTool>,
    typecheck: Arc<dyn CheckTool>,
    exports: Option<Arc<dyn ExportChecker>>,
    criteria: Option<Arc<dyn CriteriaMatcher>>,
}

impl RunValidator {
    #[must_use]
    pub fn new(
        db: SwarmDb,
        tests: Arc<dyn CheckTool>,
        lint: Arc<dyn CheckTool>,
        typecheck: Arc<dyn CheckTool>,
    ) -> Self {
        Self {
            db,
            tests,
            lint,
            typecheck,
            exports: None,
            criteria: None,
        }
    }

    #[must_use]
    pub fn with_export_checker(mut self, exports: Arc<dyn ExportChecker>) -> Self {
        self.exports = Some(exports);
        self
    }

    #[must_use]
    pub fn with_criteria_matcher(mut self, criteria: Arc<dyn CriteriaMatcher>) -> Self {
        self.criteria = Some(criteria);
        self
    }

    /// Validate the finished run and persist the verdict on its execution run.
    ///
    /// # Errors
    /// Returns `RunError` if the run is unknown or was already validated, or
    /// an error if the store fails.
    pub async fn validate_run(&self, run_id: RunId) -> Result<RunValidationReport> {
        let tasks = self.db.list_tasks().await?;
        let report = if tasks.is_empty() {
            RunValidationReport {
                run_id,
                passed: true,
                task_count: 0,
                checks: Vec::new(),
                orphaned_tasks: Vec::new(),
                coverage: None,
            }
        } else {
            self.evaluate(run_id, &tasks).await
        };

        let status = if report.passed {
            ValidationStatus::Passed
        } else {
            ValidationStatus::Failed
        };
        let details = serde_json::to_value(&report)?;
        if !self
            .db
            .finalize_run_validation(run_id, status, &details)
            .await?
            .applied()
        {
            return Err(SwarmError::RunError(format!(
                "run {run_id} is unknown or already validated"
            )));
        }

        if report.passed {
            info!(run_id = run_id.value(), tasks = report.task_count, "Run validated");
        } else {
            warn!(
                run_id = run_id.value(),
                failures = ?report.blocking_failures(),
                "Run failed validation"
            );
        }
        Ok(report)
    }

    async fn evaluate(&self, run_id: RunId, tasks: &[Task]) -> RunValidationReport {
        let test_files = distinct(tasks.iter().map(|task| task.test_file.as_str()));
        let impl_files = distinct(tasks.iter().map(|task| task.impl_file.as_str()));

        let regression = run_checks(self.tests.as_ref(), &test_files).await;
        let lint = run_checks(self.lint.as_ref(), &impl_files).await;
        let typecheck = run_checks(self.typecheck.as_ref(), &impl_files).await;

        let mut checks = vec![
            ValidationCheck::from_results("full_regression", true, regression),
            ValidationCheck::from_results("lint", true, lint),
            ValidationCheck::from_results("typecheck", true, typecheck),
        ];
        if let Some(smoke) = self.smoke_import(tasks).await {
            checks.push(smoke);
        }

        let orphaned_tasks = tasks
            .iter()
            .filter(|task| task.status.is_orphaned())
            .map(|task| task.task_key.clone())
            .collect::<Vec<_>>();

        let mut report = RunValidationReport {
            run_id,
            passed: false,
            task_count: u64::try_from(tasks.len()).unwrap_or(u64::MAX),
            checks,
            orphaned_tasks,
            coverage: self.coverage(tasks).await,
        };
        report.passed = report.blocking_failures().is_empty();
        report
    }

    async fn smoke_import(&self, tasks: &[Task]) -> Option<ValidationCheck> {
        let exports = self.exports.as_ref()?;
        let mut results = Vec::new();
        for task in tasks.iter().filter(|task| !task.module_exports.is_empty()) {
            let result = match exports.check(&task.impl_file, &task.module_exports).await {
                Ok(report) => CheckResult {
                    tool: "smoke_import".to_string(),
                    target: task.impl_file.clone(),
                    passed: report.passed,
                    output: report.output,
                },
                Err(e) => CheckResult {
                    tool: "smoke_import".to_string(),
                    target: task.impl_file.clone(),
                    passed: false,
                    output: e.to_string(),
                },
            };
            results.push(result);
        }
        Some(ValidationCheck::from_results("smoke_import", false, results))
    }

    #[allow(clippy::cast_precision_loss)]
    async fn coverage(&self, tasks: &[Task]) -> Option<CoverageSummary> {
        let criteria = self.criteria.as_ref()?;
        let mut scores = Vec::new();
        let mut low = Vec::new();
        for task in tasks.iter().filter(|task| !task.acceptance_criteria.is_empty()) {
            match criteria.coverage(task).await {
                Ok(score) => {
                    let score = score.clamp(0.0, 1.0);
                    if score < LOW_COVERAGE_THRESHOLD {
                        low.push(task.task_key.clone());
                    }
                    scores.push(score);
                }
                Err(e) => {
                    warn!(task_key = %task.task_key, error = %e, "Coverage check failed");
                    low.push(task.task_key.clone());
                    scores.push(0.0);
                }
            }
        }

        let evaluated = scores.len();
        let average = if evaluated == 0 {
            0.0
        } else {
            scores.iter().sum::<f64>() / evaluated as f64
        };
        Some(CoverageSummary {
            tasks_evaluated: u64::try_from(evaluated).unwrap_or(u64::MAX),
            average_coverage: average,
            low_coverage_tasks: low,
        })
    }
}

fn distinct<'a>(files: impl Iterator<Item = &'a str>) -> Vec<String> {
    files
        .filter(|file| !file.is_empty())
        .unique()
        .map(str::to_string)
        .collect()
}
