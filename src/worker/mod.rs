#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! One worker: claim a ready task, drive it through RED, GREEN, VERIFY and an
//! optional REFACTOR, then release it. Repeat until the phase runs dry or a
//! halting failure stops the worker.

mod green_retry;
mod heartbeat;
mod pipeline;

pub use green_retry::{
    GreenAttempts, GreenRetryPolicy, DEFAULT_MAX_GREEN_ATTEMPTS, MAX_GREEN_ATTEMPTS,
    MIN_GREEN_RETRY_TIME_SECS,
};
pub use heartbeat::HeartbeatHandle;
pub use pipeline::{Collaborators, StagePipeline};

use crate::budget_guard::InvocationBudgetGuard;
use crate::circuit_breaker::CircuitBreakerService;
use crate::db::SwarmDb;
use crate::error::{Result, SwarmError};
use crate::ports::{AgentContext, SwarmEvent};
use crate::types::{
    truncate_output, CircuitLevel, ClaimOutcome, FailureKind, RunId, Stage, StageOutcome, Task,
    TaskStatus, WorkerId, WorkerState, MAX_TEST_OUTPUT_SIZE,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MIN_POLL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub claim_timeout_secs: u64,
    pub heartbeat_interval: Duration,
    pub stage_timeout: Duration,
    pub green: GreenRetryPolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            claim_timeout_secs: 1_800,
            heartbeat_interval: Duration::from_secs(15),
            stage_timeout: Duration::from_secs(900),
            green: GreenRetryPolicy::default(),
        }
    }
}

/// Why a worker left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStop {
    NoTasks,
    BudgetExhausted,
    AgentUnavailable,
    /// Another worker in the pool hit a halting failure.
    Halted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: WorkerId,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub stop: WorkerStop,
}

/// How one claimed task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Blocked,
    Halted(FailureKind),
}

pub struct Worker {
    id: WorkerId,
    db: SwarmDb,
    pipeline: StagePipeline,
    budget: InvocationBudgetGuard,
    circuits: CircuitBreakerService,
    settings: WorkerSettings,
    halt: Arc<AtomicBool>,
    state: WorkerState,
}

impl Worker {
    #[must_use]
    pub fn new(
        id: WorkerId,
        run_id: RunId,
        db: SwarmDb,
        collaborators: Collaborators,
        budget: InvocationBudgetGuard,
        circuits: CircuitBreakerService,
        settings: WorkerSettings,
    ) -> Self {
        let pipeline = StagePipeline::new(
            collaborators,
            budget.clone(),
            run_id,
            id.clone(),
            settings.stage_timeout,
        );
        Self {
            id,
            db,
            pipeline,
            budget,
            circuits,
            settings,
            halt: Arc::new(AtomicBool::new(false)),
            state: WorkerState::Idle,
        }
    }

    /// Share a stop flag with other workers. Raising it makes every worker
    /// leave its loop before the next claim.
    #[must_use]
    pub fn with_halt_signal(mut self, halt: Arc<AtomicBool>) -> Self {
        self.halt = halt;
        self
    }

    #[must_use]
    pub const fn id(&self) -> &WorkerId {
        &self.id
    }

    #[must_use]
    pub const fn state(&self) -> WorkerState {
        self.state
    }

    /// Work the given phase until nothing is ready and nothing is in flight,
    /// or until a halting failure.
    ///
    /// # Errors
    /// Returns an error if registration or a store read fails.
    pub async fn run(mut self, phase: i64) -> Result<WorkerReport> {
        self.db.register_worker(&self.id).await?;
        let heartbeat = HeartbeatHandle::start(
            self.db.clone(),
            self.id.clone(),
            self.settings.heartbeat_interval,
        );
        info!(worker_id = %self.id, phase, "Worker started");

        let result = self.work_phase(phase, &heartbeat).await;

        heartbeat.stop().await;
        if let Err(e) = self.db.mark_worker_idle(&self.id).await {
            warn!(worker_id = %self.id, error = %e, "Failed to mark worker idle");
        }

        if let Ok(report) = &result {
            info!(
                worker_id = %self.id,
                phase,
                completed = report.tasks_completed,
                failed = report.tasks_failed,
                stop = ?report.stop,
                "Worker stopped"
            );
        }
        result
    }

    async fn work_phase(&mut self, phase: i64, heartbeat: &HeartbeatHandle) -> Result<WorkerReport> {
        let mut completed = 0_u64;
        let mut failed = 0_u64;
        let mut backoff = MIN_POLL_BACKOFF;

        let stop = loop {
            if self.halt.load(Ordering::SeqCst) {
                break WorkerStop::Halted;
            }

            let Some(task) = self.db.next_ready_in_phase(phase).await? else {
                if self.budget.check(self.pipeline.run_id()).await?.is_exhausted() {
                    break WorkerStop::BudgetExhausted;
                }
                if self.db.count_in_flight(phase).await? == 0 {
                    break WorkerStop::NoTasks;
                }
                debug!(worker_id = %self.id, phase, backoff_ms = backoff.as_millis(), "Waiting on in-flight tasks");
                tokio::time::sleep(backoff).await;
                backoff = next_poll_backoff(backoff);
                continue;
            };
            backoff = MIN_POLL_BACKOFF;

            if !self
                .db
                .claim_task(task.id, &self.id, self.settings.claim_timeout_secs)
                .await?
            {
                debug!(worker_id = %self.id, task_key = %task.task_key, "Lost claim race");
                continue;
            }

            heartbeat.set_task(Some(task.id));
            if let Err(e) = self.db.set_worker_task(&self.id, Some(task.id)).await {
                warn!(worker_id = %self.id, error = %e, "Failed to record current task");
            }

            let outcome = self.process_task(&task).await;

            heartbeat.set_task(None);

            match outcome {
                Ok(TaskOutcome::Completed) => completed += 1,
                Ok(TaskOutcome::Blocked) => failed += 1,
                Ok(TaskOutcome::Halted(kind)) => {
                    if kind == FailureKind::AgentUnavailable {
                        failed += 1;
                    }
                    self.halt.store(true, Ordering::SeqCst);
                    break match kind {
                        FailureKind::BudgetExceeded => WorkerStop::BudgetExhausted,
                        _ => WorkerStop::AgentUnavailable,
                    };
                }
                Err(e) => {
                    failed += 1;
                    error!(worker_id = %self.id, task_key = %task.task_key, error = %e, "Task aborted");
                }
            }
        };

        Ok(WorkerReport {
            worker_id: self.id.clone(),
            tasks_completed: completed,
            tasks_failed: failed,
            stop,
        })
    }

    /// Drive one claimed task to `complete`, `blocked` or a halt.
    ///
    /// Setup and store failures block the task, release the claim as
    /// `failed` and come back as `Err`. Blocking keeps the task from being
    /// claimed again in the same phase.
    ///
    /// # Errors
    /// Returns an error if branch creation or a store write fails.
    pub async fn process_task(&mut self, task: &Task) -> Result<TaskOutcome> {
        self.transition(WorkerState::Claimed)?;
        self.publish(SwarmEvent::TaskClaimed {
            worker_id: self.id.clone(),
            task_key: task.task_key.clone(),
        })
        .await;

        let outcome = match self.drive(task).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.abandon(task).await;
                Err(e)
            }
        };
        self.state = WorkerState::Idle;
        outcome
    }

    async fn drive(&mut self, task: &Task) -> Result<TaskOutcome> {
        let branch = self
            .pipeline
            .collaborators()
            .source_control
            .create_worker_branch(&self.id, &task.task_key)
            .await?;
        debug!(worker_id = %self.id, task_key = %task.task_key, branch = %branch, "Worker branch ready");

        self.transition(WorkerState::Red)?;
        let red = self.run_stage(Stage::Red, task, AgentContext::new(1)).await?;
        if let Some(kind) = red.failure_kind() {
            if kind.halts_worker() {
                return self.halt_on(task, kind).await;
            }
            warn!(worker_id = %self.id, task_key = %task.task_key, failure = %red.detail(), "RED stage failed");
            self.record_circuit_failure(CircuitLevel::Task, task.task_key.value()).await;
            self.record_circuit_failure(CircuitLevel::Stage, Stage::Red.as_str()).await;
            return self.block(task).await;
        }
        self.record_circuit_success(CircuitLevel::Stage, Stage::Red.as_str()).await;

        let clock = Arc::clone(&self.pipeline.collaborators().clock);
        let policy = self.settings.green;
        let mut attempts = policy.start(clock.as_ref());
        let mut previous_failure: Option<String> = None;

        while let Some(attempt) = attempts.next_attempt().await {
            let outcome = self
                .green_then_verify(task, attempt, previous_failure.take())
                .await?;
            match outcome.failure_kind() {
                None => return self.finish(task).await,
                Some(kind) if kind.halts_worker() => return self.halt_on(task, kind).await,
                Some(_) => {
                    previous_failure = Some(truncate_output(&outcome.detail(), MAX_TEST_OUTPUT_SIZE));
                }
            }
        }

        warn!(
            worker_id = %self.id,
            task_key = %task.task_key,
            attempts = attempts.made(),
            "GREEN attempts exhausted"
        );
        self.record_circuit_failure(CircuitLevel::Task, task.task_key.value()).await;
        self.record_circuit_failure(CircuitLevel::Stage, Stage::Green.as_str()).await;
        self.block(task).await
    }

    /// One GREEN attempt and, when its tests pass, the VERIFY that follows.
    async fn green_then_verify(
        &mut self,
        task: &Task,
        attempt: u32,
        previous_failure: Option<String>,
    ) -> Result<StageOutcome> {
        self.transition(WorkerState::Green(attempt))?;
        let context = AgentContext::new(attempt).with_previous_failure(previous_failure);
        let green = self.run_stage(Stage::Green, task, context).await?;
        if !green.is_success() {
            return Ok(green);
        }
        self.record_circuit_success(CircuitLevel::Stage, Stage::Green.as_str()).await;
        self.db
            .update_task_status_if_owner(task.id, &self.id, TaskStatus::Passing)
            .await?;

        self.transition(WorkerState::Verify)?;
        let verify = self
            .run_stage(Stage::Verify, task, AgentContext::new(attempt))
            .await?;
        if verify.is_success() {
            self.record_circuit_success(CircuitLevel::Stage, Stage::Verify.as_str()).await;
        }
        Ok(verify)
    }

    /// REFACTOR is best effort: a failure is logged and the task still completes.
    async fn finish(&mut self, task: &Task) -> Result<TaskOutcome> {
        let reasons = self.pipeline.collaborators().reviewer.review(task).await?;
        if !reasons.is_empty() {
            self.transition(WorkerState::Refactor)?;
            let context = AgentContext::new(1).with_review_reasons(reasons);
            let refactor = self.run_stage(Stage::Refactor, task, context).await?;
            if refactor.is_success() {
                self.record_circuit_success(CircuitLevel::Stage, Stage::Refactor.as_str()).await;
            } else {
                warn!(
                    worker_id = %self.id,
                    task_key = %task.task_key,
                    failure = %refactor.detail(),
                    "REFACTOR failed; keeping GREEN implementation"
                );
            }
        }

        let message = format!("{}: {}", task.task_key, task.title);
        if let Err(e) = self
            .pipeline
            .collaborators()
            .source_control
            .commit_changes(&task.task_key, &message)
            .await
        {
            warn!(worker_id = %self.id, task_key = %task.task_key, error = %e, "Commit failed");
        }

        self.db
            .update_task_status_if_owner(task.id, &self.id, TaskStatus::Complete)
            .await?;
        self.transition(WorkerState::Complete)?;
        self.record_circuit_success(CircuitLevel::Task, task.task_key.value()).await;
        self.release(task, ClaimOutcome::Completed).await;
        self.publish_finished(task, TaskStatus::Complete).await;
        info!(worker_id = %self.id, task_key = %task.task_key, "Task complete");
        Ok(TaskOutcome::Completed)
    }

    async fn block(&mut self, task: &Task) -> Result<TaskOutcome> {
        self.db
            .update_task_status_if_owner(task.id, &self.id, TaskStatus::Blocked)
            .await?;
        self.db.increment_retry_count(task.id).await?;
        self.transition(WorkerState::Blocked)?;
        self.release(task, ClaimOutcome::Failed).await;
        self.publish_finished(task, TaskStatus::Blocked).await;
        warn!(worker_id = %self.id, task_key = %task.task_key, "Task blocked");
        Ok(TaskOutcome::Blocked)
    }

    /// Best-effort cleanup after an error: the store may be what failed.
    async fn abandon(&self, task: &Task) {
        if let Err(e) = self
            .db
            .update_task_status_if_owner(task.id, &self.id, TaskStatus::Blocked)
            .await
        {
            error!(worker_id = %self.id, task_key = %task.task_key, error = %e, "Failed to block abandoned task");
        }
        if let Err(e) = self.db.increment_retry_count(task.id).await {
            warn!(worker_id = %self.id, task_key = %task.task_key, error = %e, "Failed to bump retry count");
        }
        self.release(task, ClaimOutcome::Failed).await;
        self.publish_finished(task, TaskStatus::Blocked).await;
    }

    /// A spent budget keeps the claim; agent unavailability hands the task back.
    async fn halt_on(&mut self, task: &Task, kind: FailureKind) -> Result<TaskOutcome> {
        if kind != FailureKind::BudgetExceeded {
            self.db
                .update_task_status_if_owner(task.id, &self.id, TaskStatus::Pending)
                .await?;
            self.release(task, ClaimOutcome::Failed).await;
        }
        error!(worker_id = %self.id, task_key = %task.task_key, failure = %kind, "Worker halting");
        Ok(TaskOutcome::Halted(kind))
    }

    async fn run_stage(
        &self,
        stage: Stage,
        task: &Task,
        context: AgentContext,
    ) -> Result<StageOutcome> {
        let outcome = self.pipeline.execute(stage, task, &context).await?;
        let detail = outcome.detail();
        let (output, failure) = if outcome.is_success() {
            (Some(detail.as_str()), None)
        } else {
            (None, Some(detail.as_str()))
        };
        self.db
            .record_stage_attempt(
                task.id,
                stage,
                context.attempt(),
                outcome.is_success(),
                output,
                failure,
            )
            .await?;
        Ok(outcome)
    }

    fn transition(&mut self, next: WorkerState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SwarmError::Internal(format!(
                "worker {} cannot move from {} to {next}",
                self.id, self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    async fn release(&self, task: &Task, outcome: ClaimOutcome) {
        match self.db.release_task(task.id, &self.id, outcome).await {
            Ok(true) => {}
            Ok(false) => warn!(worker_id = %self.id, task_key = %task.task_key, "Claim was no longer ours"),
            Err(e) => error!(worker_id = %self.id, task_key = %task.task_key, error = %e, "Failed to release claim"),
        }
    }

    async fn record_circuit_failure(&self, level: CircuitLevel, identifier: &str) {
        if let Err(e) = self.circuits.record_failure(level, identifier).await {
            warn!(breaker = %format!("{level}:{identifier}"), error = %e, "Failed to record circuit failure");
        }
    }

    async fn record_circuit_success(&self, level: CircuitLevel, identifier: &str) {
        if let Err(e) = self.circuits.record_success(level, identifier).await {
            warn!(breaker = %format!("{level}:{identifier}"), error = %e, "Failed to record circuit success");
        }
    }

    async fn publish_finished(&self, task: &Task, status: TaskStatus) {
        self.publish(SwarmEvent::TaskFinished {
            worker_id: self.id.clone(),
            task_key: task.task_key.clone(),
            status,
        })
        .await;
    }

    async fn publish(&self, event: SwarmEvent) {
        if let Err(e) = self.pipeline.collaborators().broadcaster.publish(event).await {
            debug!(worker_id = %self.id, error = %e, "Event not delivered");
        }
    }
}

/// Double the wait, capped at five seconds.
#[must_use]
pub fn next_poll_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).clamp(MIN_POLL_BACKOFF, MAX_POLL_BACKOFF)
}
