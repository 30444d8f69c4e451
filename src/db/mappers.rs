#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::read_ops::{
    CircuitEventRow, CircuitRow, ClaimRow, ExecutionRunRow, FlappingRow, StageAttemptRow, TaskRow,
    WorkerRow,
};
use crate::error::{Result, SwarmError};
use crate::types::{
    CircuitBreakerEvent, CircuitBreakerRecord, CircuitEventType, CircuitLevel, CircuitState,
    ClaimOutcome, ClaimRecord, ExecutionRun, FlappingCircuit, RunId, Stage, StageAttempt, Task,
    TaskId, TaskKey, TaskStatus, ValidationStatus, WorkerId, WorkerRegistration, WorkerStatus,
};

pub fn parse_task(row: TaskRow) -> Result<Task> {
    let status = TaskStatus::try_from(row.status.as_str()).map_err(SwarmError::DatabaseError)?;

    Ok(Task {
        id: TaskId::new(row.id),
        task_key: TaskKey::new(row.task_key),
        title: row.title,
        goal: row.goal,
        test_file: row.test_file,
        impl_file: row.impl_file,
        status,
        phase: row.phase,
        sequence: row.sequence,
        depends_on: parse_string_list(&row.depends_on, "depends_on")?
            .into_iter()
            .map(TaskKey::new)
            .collect(),
        claimed_by: row.claimed_by.map(WorkerId::new),
        claimed_at: row.claimed_at,
        claim_expires_at: row.claim_expires_at,
        retry_count: to_u32_i64(row.retry_count),
        acceptance_criteria: parse_string_list(&row.acceptance_criteria, "acceptance_criteria")?,
        module_exports: parse_string_list(&row.module_exports, "module_exports")?,
    })
}

pub fn parse_claim(row: ClaimRow) -> Result<ClaimRecord> {
    let outcome = row
        .outcome
        .as_deref()
        .map(ClaimOutcome::try_from)
        .transpose()
        .map_err(SwarmError::DatabaseError)?;

    Ok(ClaimRecord {
        id: row.id,
        task_id: TaskId::new(row.task_id),
        worker_id: WorkerId::new(row.worker_id),
        claimed_at: row.claimed_at,
        released_at: row.released_at,
        outcome,
    })
}

pub fn parse_worker(row: WorkerRow) -> Result<WorkerRegistration> {
    WorkerStatus::try_from(row.status.as_str())
        .map_err(SwarmError::DatabaseError)
        .map(|status| WorkerRegistration {
            worker_id: WorkerId::new(row.worker_id),
            status,
            last_heartbeat: row.last_heartbeat,
            current_task_id: row.current_task_id.map(TaskId::new),
        })
}

pub fn parse_stage_attempt(row: StageAttemptRow) -> Result<StageAttempt> {
    Stage::try_from(row.stage.as_str())
        .map_err(SwarmError::DatabaseError)
        .map(|stage| StageAttempt {
            id: row.id,
            task_id: TaskId::new(row.task_id),
            stage,
            attempt_number: to_u32_i64(row.attempt_number),
            success: row.success,
            output: row.output,
            error: row.error,
            started_at: row.started_at,
        })
}

pub fn parse_circuit(row: CircuitRow) -> Result<CircuitBreakerRecord> {
    let level = CircuitLevel::try_from(row.level.as_str()).map_err(SwarmError::DatabaseError)?;
    let state = CircuitState::try_from(row.state.as_str()).map_err(SwarmError::DatabaseError)?;

    Ok(CircuitBreakerRecord {
        id: row.id,
        level,
        identifier: row.identifier,
        state,
        failure_count: to_u32_i64(row.failure_count),
        success_count: to_u32_i64(row.success_count),
        opened_at: row.opened_at,
        last_failure_at: row.last_failure_at,
        last_success_at: row.last_success_at,
        version: row.version,
    })
}

pub fn parse_circuit_event(row: CircuitEventRow) -> Result<CircuitBreakerEvent> {
    let event_type =
        CircuitEventType::try_from(row.event_type.as_str()).map_err(SwarmError::DatabaseError)?;
    let from_state =
        CircuitState::try_from(row.from_state.as_str()).map_err(SwarmError::DatabaseError)?;
    let to_state =
        CircuitState::try_from(row.to_state.as_str()).map_err(SwarmError::DatabaseError)?;

    Ok(CircuitBreakerEvent {
        id: row.id,
        circuit_id: row.circuit_id,
        event_type,
        from_state,
        to_state,
        created_at: row.created_at,
    })
}

pub fn parse_flapping(row: FlappingRow) -> Result<FlappingCircuit> {
    let level = CircuitLevel::try_from(row.level.as_str()).map_err(SwarmError::DatabaseError)?;
    let state = CircuitState::try_from(row.state.as_str()).map_err(SwarmError::DatabaseError)?;

    Ok(FlappingCircuit {
        circuit_id: row.circuit_id,
        level,
        identifier: row.identifier,
        state,
        state_changes: to_u64_i64(row.state_changes),
    })
}

pub fn parse_execution_run(row: ExecutionRunRow) -> Result<ExecutionRun> {
    let validation_status = ValidationStatus::try_from(row.validation_status.as_str())
        .map_err(SwarmError::DatabaseError)?;
    let validation_details = row
        .validation_details
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| SwarmError::DatabaseError(format!("Invalid validation_details JSON: {e}")))?;

    Ok(ExecutionRun {
        id: RunId::new(row.id),
        max_workers: to_u32_i64(row.max_workers),
        started_at: row.started_at,
        validation_status,
        validation_details,
    })
}

/// Decode a JSON array of strings stored in a TEXT column.
pub fn parse_string_list(raw: &str, column: &str) -> Result<Vec<String>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str::<Vec<String>>(raw)
        .map_err(|e| SwarmError::DatabaseError(format!("Invalid {column} JSON: {e}")))
}

pub fn encode_string_list<S: AsRef<str>>(items: &[S]) -> Result<String> {
    serde_json::to_string(&items.iter().map(AsRef::as_ref).collect::<Vec<_>>())
        .map_err(SwarmError::from)
}

pub fn to_u32_i64(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

pub fn to_u64_i64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

pub fn to_i64_u64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
