#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

mod budget;
mod circuit_breaker;
mod claim_types;
mod health;
mod identifiers;
mod run;
mod stage;
mod task;
mod worker_types;

pub use budget::{
    BudgetCheck, BudgetLimit, DEFAULT_MAX_INVOCATIONS, MAX_MAX_INVOCATIONS, MIN_MAX_INVOCATIONS,
    WARNING_THRESHOLD_PERCENT,
};
pub use circuit_breaker::{
    CircuitBreakerEvent, CircuitBreakerRecord, CircuitConfig, CircuitEventType, CircuitLevel,
    CircuitState,
};
pub use claim_types::{CasOutcome, ClaimOutcome, ClaimRecord};
pub use health::{FlappingCircuit, HealthStatus, HealthSummary};
pub use identifiers::{RunId, TaskId, TaskKey, WorkerId};
pub use run::{
    CheckResult, CoverageSummary, ExecutionRun, PhaseGateReport, RunValidationReport,
    StoppedReason, ValidationCheck, ValidationStatus,
};
pub use stage::{
    truncate_output, FailureKind, Stage, StageAttempt, StageOutcome, VerifyIssue,
    MAX_TEST_OUTPUT_SIZE,
};
pub use task::{NewTask, Task, TaskStatus};
pub use worker_types::{WorkerRegistration, WorkerState, WorkerStatus};
