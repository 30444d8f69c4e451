#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::identifiers::{RunId, TaskKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationStatus {
    Pending,
    Passed,
    Failed,
}

impl ValidationStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }
}

impl TryFrom<&str> for ValidationStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown validation status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub id: RunId,
    pub max_workers: u32,
    pub started_at: DateTime<Utc>,
    pub validation_status: ValidationStatus,
    pub validation_details: Option<serde_json::Value>,
}

/// Why a multi-phase run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StoppedReason {
    #[default]
    None,
    NoTasks,
    BudgetExhausted,
    GateFailure,
    AgentUnavailable,
}

impl StoppedReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::NoTasks => "no_tasks",
            Self::BudgetExhausted => "budget_exhausted",
            Self::GateFailure => "gate_failure",
            Self::AgentUnavailable => "agent_unavailable",
        }
    }
}

impl fmt::Display for StoppedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one tool run against one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub tool: String,
    pub target: String,
    pub passed: bool,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseGateReport {
    pub phase: i64,
    pub passed: bool,
    /// Tasks in earlier phases that are not `complete`.
    pub incomplete_tasks: Vec<TaskKey>,
    /// Per-file regression results for the gated phase.
    pub regression: Vec<CheckResult>,
    pub reason: Option<String>,
}

impl PhaseGateReport {
    #[must_use]
    pub const fn trivially_passed(phase: i64) -> Self {
        Self {
            phase,
            passed: true,
            incomplete_tasks: Vec::new(),
            regression: Vec::new(),
            reason: None,
        }
    }
}

/// A group of results for one validation check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub blocking: bool,
    pub passed: bool,
    pub results: Vec<CheckResult>,
}

impl ValidationCheck {
    #[must_use]
    pub fn from_results(name: &str, blocking: bool, results: Vec<CheckResult>) -> Self {
        Self {
            name: name.to_string(),
            blocking,
            passed: results.iter().all(|result| result.passed),
            results,
        }
    }
}

/// Acceptance-criteria coverage summary; informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub tasks_evaluated: u64,
    pub average_coverage: f64,
    pub low_coverage_tasks: Vec<TaskKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunValidationReport {
    pub run_id: RunId,
    pub passed: bool,
    pub task_count: u64,
    pub checks: Vec<ValidationCheck>,
    pub orphaned_tasks: Vec<TaskKey>,
    pub coverage: Option<CoverageSummary>,
}

impl RunValidationReport {
    /// Names of the blocking checks that failed.
    #[must_use]
    pub fn blocking_failures(&self) -> Vec<&str> {
        let mut failures = self
            .checks
            .iter()
            .filter(|check| check.blocking && !check.passed)
            .map(|check| check.name.as_str())
            .collect::<Vec<_>>();
        if !self.orphaned_tasks.is_empty() {
            failures.push("orphaned_tasks");
        }
        failures
    }
}
