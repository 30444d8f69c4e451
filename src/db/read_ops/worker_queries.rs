#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::db::mappers::{parse_stage_attempt, parse_worker, to_u64_i64};
use crate::db::SwarmDb;
use crate::error::{Result, SwarmError};
use crate::types::{RunId, Stage, StageAttempt, TaskId, WorkerId, WorkerRegistration};

use super::types::{StageAttemptRow, WorkerRow};

impl SwarmDb {
    pub async fn get_worker(&self, worker_id: &WorkerId) -> Result<Option<WorkerRegistration>> {
        sqlx::query_as::<_, WorkerRow>(
            "SELECT worker_id, status, last_heartbeat, current_task_id
             FROM workers WHERE worker_id = ?1",
        )
        .bind(worker_id.value())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to get worker: {e}")))
        .and_then(|row| row.map(parse_worker).transpose())
    }

    pub async fn count_heartbeats(&self, worker_id: &WorkerId) -> Result<u64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM worker_heartbeats WHERE worker_id = ?1")
            .bind(worker_id.value())
            .fetch_one(self.pool())
            .await
            .map(to_u64_i64)
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to count heartbeats: {e}")))
    }

    /// Invocations recorded against a run; the budget guard's source of truth.
    pub async fn count_invocations(&self, run_id: RunId) -> Result<u64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM invocations WHERE run_id = ?1")
            .bind(run_id.value())
            .fetch_one(self.pool())
            .await
            .map(to_u64_i64)
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to count invocations: {e}")))
    }

    pub async fn count_invocations_for_stage(&self, run_id: RunId, stage: Stage) -> Result<u64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM invocations WHERE run_id = ?1 AND stage = ?2",
        )
        .bind(run_id.value())
        .bind(stage.as_str())
        .fetch_one(self.pool())
        .await
        .map(to_u64_i64)
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to count stage invocations: {e}")))
    }

    pub async fn stage_attempts(&self, task_id: TaskId) -> Result<Vec<StageAttempt>> {
        sqlx::query_as::<_, StageAttemptRow>(
            "SELECT id, task_id, stage, attempt_number, success, output, error, started_at
             FROM stage_attempts
             WHERE task_id = ?1
             ORDER BY id",
        )
        .bind(task_id.value())
        .fetch_all(self.pool())
        .await
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to get stage attempts: {e}")))
        .and_then(|rows| rows.into_iter().map(parse_stage_attempt).collect())
    }
}
