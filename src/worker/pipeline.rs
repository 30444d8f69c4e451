#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::budget_guard::InvocationBudgetGuard;
use crate::error::Result;
use crate::ports::{
    AgentContext, AgentError, CheckTool, Clock, CodeAgent, EventBroadcaster, SourceControl,
    StaticReviewer, ToolReport,
};
use crate::types::{
    truncate_output, FailureKind, RunId, Stage, StageOutcome, Task, VerifyIssue, WorkerId,
    MAX_TEST_OUTPUT_SIZE,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything a worker talks to outside the store.
#[derive(Clone)]
pub struct Collaborators {
    pub agent: Arc<dyn CodeAgent>,
    pub tests: Arc<dyn CheckTool>,
    pub lint: Arc<dyn CheckTool>,
    pub typecheck: Arc<dyn CheckTool>,
    pub source_control: Arc<dyn SourceControl>,
    pub reviewer: Arc<dyn StaticReviewer>,
    pub broadcaster: Arc<dyn EventBroadcaster>,
    pub clock: Arc<dyn Clock>,
}

/// Runs single stages for one worker within one execution run.
///
/// Every call is admitted through the invocation budget first. A spent
/// budget fails the stage with `BudgetExceeded` before any collaborator is
/// contacted; the attempt is still on the ledger.
#[derive(Clone)]
pub struct StagePipeline {
    collaborators: Collaborators,
    budget: InvocationBudgetGuard,
    run_id: RunId,
    worker_id: WorkerId,
    stage_timeout: Duration,
}

impl StagePipeline {
    #[must_use]
    pub const fn new(
        collaborators: Collaborators,
        budget: InvocationBudgetGuard,
        run_id: RunId,
        worker_id: WorkerId,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            collaborators,
            budget,
            run_id,
            worker_id,
            stage_timeout,
        }
    }

    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    #[must_use]
    pub const fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Run one stage. Stage failures come back as a failed [`StageOutcome`];
    /// only store errors are returned as `Err`.
    ///
    /// # Errors
    /// Returns an error if the invocation ledger cannot be read or written.
    pub async fn execute(
        &self,
        stage: Stage,
        task: &Task,
        context: &AgentContext,
    ) -> Result<StageOutcome> {
        let check = self
            .budget
            .admit(self.run_id, stage, &self.worker_id, task.id)
            .await?;
        if check.is_exhausted() {
            warn!(
                worker_id = %self.worker_id,
                task_key = %task.task_key,
                stage = %stage,
                count = check.count,
                limit = check.limit,
                "Invocation budget exhausted; stage not run"
            );
            return Ok(StageOutcome::failed(
                FailureKind::BudgetExceeded,
                format!("invocation budget spent ({}/{})", check.count, check.limit),
            ));
        }

        debug!(
            worker_id = %self.worker_id,
            task_key = %task.task_key,
            stage = %stage,
            attempt = context.attempt(),
            "Running stage"
        );

        let outcome = match stage {
            Stage::Red => self.run_red(task, context).await,
            Stage::Green => self.run_green(task, context).await,
            Stage::Verify => self.run_verify(task).await,
            Stage::Refactor => self.run_refactor(task, context).await,
        };
        Ok(outcome)
    }

    /// Tests are written first, so they must fail against the current code.
    async fn run_red(&self, task: &Task, context: &AgentContext) -> StageOutcome {
        if let Err(failed) = self.call_agent(Stage::Red, task, context).await {
            return failed;
        }
        match self.run_tool(&self.collaborators.tests, &task.test_file).await {
            Ok(report) if report.passed => StageOutcome::failed(
                FailureKind::ContractViolation,
                format!("RED tests for {} passed before any implementation", task.task_key),
            ),
            Ok(report) => StageOutcome::passed(report.output),
            Err(failed) => failed,
        }
    }

    async fn run_green(&self, task: &Task, context: &AgentContext) -> StageOutcome {
        if let Err(failed) = self.call_agent(Stage::Green, task, context).await {
            return failed;
        }
        match self.run_tool(&self.collaborators.tests, &task.test_file).await {
            Ok(report) if report.passed => StageOutcome::passed(report.output),
            Ok(report) => StageOutcome::with_issues(
                FailureKind::ToolFailure,
                "tests still failing",
                vec![issue(self.collaborators.tests.name(), &report.output)],
            ),
            Err(failed) => failed,
        }
    }

    /// Tests, lint and type-check all run; every failing tool adds an issue.
    async fn run_verify(&self, task: &Task) -> StageOutcome {
        let checks = [
            (&self.collaborators.tests, task.test_file.as_str()),
            (&self.collaborators.lint, task.impl_file.as_str()),
            (&self.collaborators.typecheck, task.impl_file.as_str()),
        ];

        let reports = futures_util::future::join_all(
            checks
                .iter()
                .map(|(tool, target)| async move { (tool.name(), self.run_tool(tool, target).await) }),
        )
        .await;

        let issues: Vec<VerifyIssue> = reports
            .iter()
            .filter_map(|(name, result)| match result {
                Ok(report) if report.passed => None,
                Ok(report) => Some(issue(name, &report.output)),
                Err(failed) => Some(issue(name, &failed.detail())),
            })
            .collect();

        if issues.is_empty() {
            StageOutcome::passed(format!("{} checks passed", reports.len()))
        } else {
            StageOutcome::with_issues(
                FailureKind::ToolFailure,
                format!("{} of {} checks failed", issues.len(), reports.len()),
                issues,
            )
        }
    }

    async fn run_refactor(&self, task: &Task, context: &AgentContext) -> StageOutcome {
        if let Err(failed) = self.call_agent(Stage::Refactor, task, context).await {
            return failed;
        }
        match self.run_tool(&self.collaborators.tests, &task.test_file).await {
            Ok(report) if report.passed => StageOutcome::passed(report.output),
            Ok(report) => StageOutcome::with_issues(
                FailureKind::ToolFailure,
                "tests broke during refactor",
                vec![issue(self.collaborators.tests.name(), &report.output)],
            ),
            Err(failed) => failed,
        }
    }

    async fn call_agent(
        &self,
        stage: Stage,
        task: &Task,
        context: &AgentContext,
    ) -> std::result::Result<String, StageOutcome> {
        let call = self.collaborators.agent.invoke(stage, task, context);
        match tokio::time::timeout(self.stage_timeout, call).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(AgentError::Unavailable(reason))) => Err(StageOutcome::failed(
                FailureKind::AgentUnavailable,
                reason,
            )),
            Ok(Err(AgentError::Timeout(secs))) => Err(StageOutcome::failed(
                FailureKind::Timeout,
                format!("agent gave up after {secs}s"),
            )),
            Ok(Err(AgentError::Failed(reason))) => {
                Err(StageOutcome::failed(FailureKind::AgentError, reason))
            }
            Err(_elapsed) => Err(StageOutcome::failed(
                FailureKind::Timeout,
                format!(
                    "{stage} agent call exceeded {}s",
                    self.stage_timeout.as_secs()
                ),
            )),
        }
    }

    async fn run_tool(
        &self,
        tool: &Arc<dyn CheckTool>,
        target: &str,
    ) -> std::result::Result<ToolReport, StageOutcome> {
        match tokio::time::timeout(self.stage_timeout, tool.run(target)).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(StageOutcome::failed(
                FailureKind::ToolFailure,
                format!("{} could not run on {target}: {e}", tool.name()),
            )),
            Err(_elapsed) => Err(StageOutcome::failed(
                FailureKind::Timeout,
                format!(
                    "{} on {target} exceeded {}s",
                    tool.name(),
                    self.stage_timeout.as_secs()
                ),
            )),
        }
    }
}

fn issue(tool: &str, output: &str) -> VerifyIssue {
    VerifyIssue {
        tool: tool.to_string(),
        output: truncate_output(output, MAX_TEST_OUTPUT_SIZE),
    }
}
