#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(FromRow)]
pub(crate) struct TaskRow {
    pub(crate) id: i64,
    pub(crate) task_key: String,
    pub(crate) title: String,
    pub(crate) goal: String,
    pub(crate) test_file: String,
    pub(crate) impl_file: String,
    pub(crate) status: String,
    pub(crate) phase: i64,
    pub(crate) sequence: i64,
    pub(crate) depends_on: String,
    pub(crate) claimed_by: Option<String>,
    pub(crate) claimed_at: Option<DateTime<Utc>>,
    pub(crate) claim_expires_at: Option<DateTime<Utc>>,
    pub(crate) retry_count: i64,
    pub(crate) acceptance_criteria: String,
    pub(crate) module_exports: String,
}

#[derive(FromRow)]
pub(crate) struct ClaimRow {
    pub(crate) id: i64,
    pub(crate) task_id: i64,
    pub(crate) worker_id: String,
    pub(crate) claimed_at: DateTime<Utc>,
    pub(crate) released_at: Option<DateTime<Utc>>,
    pub(crate) outcome: Option<String>,
}

#[derive(FromRow)]
pub(crate) struct WorkerRow {
    pub(crate) worker_id: String,
    pub(crate) status: String,
    pub(crate) last_heartbeat: DateTime<Utc>,
    pub(crate) current_task_id: Option<i64>,
}

#[derive(FromRow)]
pub(crate) struct StageAttemptRow {
    pub(crate) id: i64,
    pub(crate) task_id: i64,
    pub(crate) stage: String,
    pub(crate) attempt_number: i64,
    pub(crate) success: bool,
    pub(crate) output: Option<String>,
    pub(crate) error: Option<String>,
    pub(crate) started_at: DateTime<Utc>,
}

#[derive(FromRow)]
pub(crate) struct CircuitRow {
    pub(crate) id: i64,
    pub(crate) level: String,
    pub(crate) identifier: String,
    pub(crate) state: String,
    pub(crate) failure_count: i64,
    pub(crate) success_count: i64,
    pub(crate) opened_at: Option<DateTime<Utc>>,
    pub(crate) last_failure_at: Option<DateTime<Utc>>,
    pub(crate) last_success_at: Option<DateTime<Utc>>,
    pub(crate) version: i64,
}

#[derive(FromRow)]
pub(crate) struct CircuitEventRow {
    pub(crate) id: i64,
    pub(crate) circuit_id: i64,
    pub(crate) event_type: String,
    pub(crate) from_state: String,
    pub(crate) to_state: String,
    pub(crate) created_at: DateTime<Utc>,
}

#[derive(FromRow)]
pub(crate) struct CircuitHealthRow {
    pub(crate) total: i64,
    pub(crate) open: i64,
    pub(crate) half_open: i64,
}

#[derive(FromRow)]
pub(crate) struct FlappingRow {
    pub(crate) circuit_id: i64,
    pub(crate) level: String,
    pub(crate) identifier: String,
    pub(crate) state: String,
    pub(crate) state_changes: i64,
}

#[derive(FromRow)]
pub(crate) struct ExecutionRunRow {
    pub(crate) id: i64,
    pub(crate) max_workers: i64,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) validation_status: String,
    pub(crate) validation_details: Option<String>,
}
