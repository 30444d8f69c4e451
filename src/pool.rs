#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::budget_guard::InvocationBudgetGuard;
use crate::circuit_breaker::CircuitBreakerService;
use crate::db::SwarmDb;
use crate::error::Result;
use crate::gate::PhaseGate;
use crate::ports::SwarmEvent;
use crate::run_validator::RunValidator;
use crate::types::{PhaseGateReport, RunId, RunValidationReport, StoppedReason, WorkerId};
use crate::worker::{Collaborators, Worker, WorkerReport, WorkerSettings, WorkerStop};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Workers whose heartbeat is older than this many intervals are reaped.
const DEAD_WORKER_INTERVALS: u64 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseRunSummary {
    pub phase: i64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub stopped_reason: StoppedReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolRunSummary {
    pub run_id: RunId,
    pub phases_run: Vec<i64>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_invocations: u64,
    pub stopped_reason: StoppedReason,
    pub gate_reports: Vec<PhaseGateReport>,
    pub validation: Option<RunValidationReport>,
}

/// Runs phases in order with a fixed number of workers per phase.
///
/// There is no partitioning: workers race on the atomic claim, so whoever is
/// free picks up the next ready task.
#[derive(Clone)]
pub struct WorkerPool {
    db: SwarmDb,
    collaborators: Collaborators,
    budget: InvocationBudgetGuard,
    circuits: CircuitBreakerService,
    gate: PhaseGate,
    validator: Option<RunValidator>,
    max_workers: u32,
    settings: WorkerSettings,
}

impl WorkerPool {
    #[must_use]
    pub fn new(
        db: SwarmDb,
        collaborators: Collaborators,
        budget: InvocationBudgetGuard,
        circuits: CircuitBreakerService,
        max_workers: u32,
        settings: WorkerSettings,
    ) -> Self {
        let gate = PhaseGate::new(db.clone(), Arc::clone(&collaborators.tests));
        Self {
            db,
            collaborators,
            budget,
            circuits,
            gate,
            validator: None,
            max_workers: max_workers.max(1),
            settings,
        }
    }

    #[must_use]
    pub fn with_validator(mut self, validator: RunValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    #[must_use]
    pub const fn max_workers(&self) -> u32 {
        self.max_workers
    }

    /// Open an execution run and work every phase from the lowest up.
    ///
    /// A phase above the first starts only once its gate passes. The run
    /// stops early on a closed gate, a spent budget, or an unavailable agent.
    ///
    /// # Errors
    /// Returns an error if the store fails or the run cannot be validated.
    pub async fn run_all_phases(&self) -> Result<PoolRunSummary> {
        let run_id = self.db.create_execution_run(self.max_workers).await?;
        let phases = self.db.phases().await?;
        info!(run_id = run_id.value(), phases = phases.len(), workers = self.max_workers, "Run started");

        let mut summary = PoolRunSummary {
            run_id,
            phases_run: Vec::new(),
            tasks_completed: 0,
            tasks_failed: 0,
            total_invocations: 0,
            stopped_reason: if phases.is_empty() {
                StoppedReason::NoTasks
            } else {
                StoppedReason::None
            },
            gate_reports: Vec::new(),
            validation: None,
        };

        for phase in phases.iter().copied() {
            let gate = self.gate.validate_phase(phase).await?;
            let gate_passed = gate.passed;
            summary.gate_reports.push(gate);
            if !gate_passed {
                summary.stopped_reason = StoppedReason::GateFailure;
                break;
            }

            let phase_summary = self.run_parallel_phase(run_id, phase).await?;
            summary.phases_run.push(phase);
            summary.tasks_completed += phase_summary.tasks_completed;
            summary.tasks_failed += phase_summary.tasks_failed;
            if phase_summary.stopped_reason != StoppedReason::None {
                summary.stopped_reason = phase_summary.stopped_reason;
                break;
            }
        }

        summary.total_invocations = self.db.count_invocations(run_id).await?;
        if let Some(validator) = &self.validator {
            summary.validation = Some(validator.validate_run(run_id).await?);
        }

        info!(
            run_id = run_id.value(),
            completed = summary.tasks_completed,
            failed = summary.tasks_failed,
            invocations = summary.total_invocations,
            stopped_reason = %summary.stopped_reason,
            "Run finished"
        );
        Ok(summary)
    }

    /// Start the configured number of workers on `phase` and wait for all of them.
    ///
    /// # Errors
    /// Returns an error if pre-phase cleanup fails.
    pub async fn run_parallel_phase(&self, run_id: RunId, phase: i64) -> Result<PhaseRunSummary> {
        let reclaimed = self.db.cleanup_stale_claims().await?;
        let reap_after = self
            .settings
            .heartbeat_interval
            .as_secs()
            .max(1)
            .saturating_mul(DEAD_WORKER_INTERVALS);
        let reaped = self.db.reap_dead_workers(reap_after).await?;
        info!(phase, reclaimed, reaped, "Phase starting");
        self.publish(SwarmEvent::PhaseStarted { phase }).await;

        let halt = Arc::new(AtomicBool::new(false));
        let handles = (1..=self.max_workers)
            .map(|number| {
                let worker = Worker::new(
                    WorkerId::generate(number),
                    run_id,
                    self.db.clone(),
                    self.collaborators.clone(),
                    self.budget.clone(),
                    self.circuits.clone(),
                    self.settings,
                )
                .with_halt_signal(Arc::clone(&halt));
                tokio::spawn(worker.run(phase))
            })
            .collect::<Vec<_>>();

        let reports = join_all(handles)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(Ok(report)) => Some(report),
                Ok(Err(e)) => {
                    error!(phase, error = %e, "Worker failed");
                    None
                }
                Err(e) => {
                    error!(phase, error = %e, "Worker task panicked or was cancelled");
                    None
                }
            })
            .collect::<Vec<_>>();

        let summary = summarize_phase(phase, &reports);
        if summary.stopped_reason != StoppedReason::None {
            warn!(phase, stopped_reason = %summary.stopped_reason, "Phase stopped early");
        }
        self.publish(SwarmEvent::PhaseFinished {
            phase,
            tasks_completed: summary.tasks_completed,
            tasks_failed: summary.tasks_failed,
        })
        .await;
        Ok(summary)
    }

    async fn publish(&self, event: SwarmEvent) {
        if let Err(e) = self.collaborators.broadcaster.publish(event).await {
            warn!(error = %e, "Failed to publish pool event");
        }
    }
}

fn summarize_phase(phase: i64, reports: &[WorkerReport]) -> PhaseRunSummary {
    let stopped_on = |stop: WorkerStop| reports.iter().any(|report| report.stop == stop);
    let stopped_reason = if stopped_on(WorkerStop::BudgetExhausted) {
        StoppedReason::BudgetExhausted
    } else if stopped_on(WorkerStop::AgentUnavailable) {
        StoppedReason::AgentUnavailable
    } else {
        StoppedReason::None
    };

    PhaseRunSummary {
        phase,
        tasks_completed: reports.iter().map(|report| report.tasks_completed).sum(),
        tasks_failed: reports.iter().map(|report| report.tasks_failed).sum(),
        stopped_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::summarize_phase;
    use crate::types::{StoppedReason, WorkerId};
    use crate::worker::{WorkerReport, WorkerStop};

    fn report(completed: u64, failed: u64, stop: WorkerStop) -> WorkerReport {
        WorkerReport {
            worker_id: WorkerId::new(format!("w-{completed}-{failed}")),
            tasks_completed: completed,
            tasks_failed: failed,
            stop,
        }
    }

    #[test]
    fn phase_totals_sum_every_worker() {
        let summary = summarize_phase(
            1,
            &[
                report(2, 0, WorkerStop::NoTasks),
                report(1, 1, WorkerStop::NoTasks),
            ],
        );
        assert_eq!(summary.tasks_completed, 3);
        assert_eq!(summary.tasks_failed, 1);
        assert_eq!(summary.stopped_reason, StoppedReason::None);
    }

    #[test]
    fn budget_exhaustion_outranks_agent_unavailability() {
        let summary = summarize_phase(
            0,
            &[
                report(0, 1, WorkerStop::AgentUnavailable),
                report(0, 0, WorkerStop::BudgetExhausted),
                report(0, 0, WorkerStop::Halted),
            ],
        );
        assert_eq!(summary.stopped_reason, StoppedReason::BudgetExhausted);
    }
}
