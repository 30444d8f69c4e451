#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::db::SwarmDb;
use crate::error::Result;
use crate::ports::CheckTool;
use crate::types::{CheckResult, PhaseGateReport, Task, TaskStatus};
use itertools::Itertools;
use std::sync::Arc;
use tracing::{info, warn};

/// Decides whether phase `n` may start.
#[derive(Clone)]
pub struct PhaseGate {
    db: SwarmDb,
    tests: Arc<dyn CheckTool>,
}

impl PhaseGate {
    #[must_use]
    pub fn new(db: SwarmDb, tests: Arc<dyn CheckTool>) -> Self {
        Self { db, tests }
    }

    /// Phase 0 always passes. Later phases need every earlier task complete
    /// and a green regression run over the test files of the phase just before.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn validate_phase(&self, phase: i64) -> Result<PhaseGateReport> {
        if phase <= 0 {
            return Ok(PhaseGateReport::trivially_passed(phase));
        }

        let earlier = self.db.tasks_before_phase(phase).await?;
        let incomplete = earlier
            .iter()
            .filter(|task| task.status != TaskStatus::Complete)
            .map(|task| task.task_key.clone())
            .collect::<Vec<_>>();

        if !incomplete.is_empty() {
            warn!(phase, incomplete = incomplete.len(), "Phase gate closed: earlier work unfinished");
            let reason = format!(
                "{} task(s) in earlier phases are not complete",
                incomplete.len()
            );
            return Ok(PhaseGateReport {
                phase,
                passed: false,
                incomplete_tasks: incomplete,
                regression: Vec::new(),
                reason: Some(reason),
            });
        }

        let regression = run_checks(self.tests.as_ref(), &gated_test_files(&earlier)).await;
        let failures = regression.iter().filter(|result| !result.passed).count();
        let passed = failures == 0;
        if passed {
            info!(phase, files = regression.len(), "Phase gate open");
        } else {
            warn!(phase, failures, "Phase gate closed: regression failures");
        }

        Ok(PhaseGateReport {
            phase,
            passed,
            incomplete_tasks: Vec::new(),
            regression,
            reason: (!passed).then(|| format!("{failures} regression file(s) failing")),
        })
    }
}

/// Test files of the highest phase below the gate.
fn gated_test_files(earlier: &[Task]) -> Vec<String> {
    let Some(gated_phase) = earlier.iter().map(|task| task.phase).max() else {
        return Vec::new();
    };
    earlier
        .iter()
        .filter(|task| task.phase == gated_phase && !task.test_file.is_empty())
        .map(|task| task.test_file.clone())
        .unique()
        .collect()
}

/// Run `tool` on each target in turn.
pub(crate) async fn run_checks(tool: &dyn CheckTool, targets: &[String]) -> Vec<CheckResult> {
    let mut results = Vec::with_capacity(targets.len());
    for target in targets {
        results.push(run_check(tool, target).await);
    }
    results
}

/// A tool that cannot run counts as failed.
async fn run_check(tool: &dyn CheckTool, target: &str) -> CheckResult {
    match tool.run(target).await {
        Ok(report) => CheckResult {
            tool: tool.name().to_string(),
            target: target.to_string(),
            passed: report.passed,
            output: report.output,
        },
        Err(e) => CheckResult {
            tool: tool.name().to_string(),
            target: target.to_string(),
            passed: false,
            output: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{seed_task_with_status, test_db};
    use crate::ports::{PortFuture, ToolReport};
    use crate::types::NewTask;

    /// Fails exactly one test file and passes the rest.
    struct FailsOne(&'static str);

    impl CheckTool for FailsOne {
        fn name(&self) -> &str {
            "tests"
        }

        fn run<'a>(&'a self, target: &'a str) -> PortFuture<'a, ToolReport> {
            Box::pin(async move {
                let passed = target != self.0;
                Ok(ToolReport::new(passed, if passed { "ok" } else { "1 failed" }))
            })
        }
    }

    async fn seeded(statuses: [TaskStatus; 2]) -> (PhaseGate, tempfile::TempDir) {
        let (db, dir) = test_db().await;
        seed_task_with_status(
            &db,
            NewTask::new("models", 0, 1).with_files("tests/test_models.py", "src/models.py"),
            statuses[0],
        )
        .await;
        seed_task_with_status(
            &db,
            NewTask::new("api", 0, 2).with_files("tests/test_api.py", "src/api.py"),
            statuses[1],
        )
        .await;
        seed_task_with_status(
            &db,
            NewTask::new("cli", 1, 1).with_files("tests/test_cli.py", "src/cli.py"),
            TaskStatus::Pending,
        )
        .await;
        (PhaseGate::new(db, Arc::new(FailsOne("tests/test_api.py"))), dir)
    }

    mod given_every_earlier_task_complete {
        use super::*;

        #[tokio::test]
        async fn when_one_regression_file_fails_then_the_gate_stays_closed_with_the_failure_recorded() {
            let (gate, _dir) = seeded([TaskStatus::Complete, TaskStatus::Complete]).await;

            let report = gate.validate_phase(1).await.unwrap_or_else(|e| unreachable!("gate: {e}"));

            assert!(!report.passed);
            assert!(report.incomplete_tasks.is_empty());
            assert_eq!(report.regression.len(), 2);
            let failing = report
                .regression
                .iter()
                .find(|result| result.target == "tests/test_api.py")
                .unwrap_or_else(|| unreachable!("api regression missing"));
            assert!(!failing.passed);
            assert_eq!(failing.output, "1 failed");
            assert!(report
                .regression
                .iter()
                .any(|result| result.target == "tests/test_models.py" && result.passed));
            assert!(report.reason.is_some_and(|reason| reason.contains("1 regression")));
        }
    }

    mod given_unfinished_earlier_work {
        use super::*;

        #[tokio::test]
        async fn when_validated_then_the_gate_names_the_task_and_skips_regression() {
            let (gate, _dir) = seeded([TaskStatus::Complete, TaskStatus::Blocked]).await;

            let report = gate.validate_phase(1).await.unwrap_or_else(|e| unreachable!("gate: {e}"));

            assert!(!report.passed);
            assert_eq!(report.incomplete_tasks.len(), 1);
            assert_eq!(report.incomplete_tasks[0].value(), "api");
            assert!(report.regression.is_empty());
        }
    }

    #[tokio::test]
    async fn phase_zero_always_passes() {
        let (gate, _dir) = seeded([TaskStatus::Pending, TaskStatus::Pending]).await;

        let report = gate.validate_phase(0).await.unwrap_or_else(|e| unreachable!("gate: {e}"));

        assert!(report.passed);
    }
}
