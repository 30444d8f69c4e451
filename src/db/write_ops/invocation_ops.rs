#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::db::SwarmDb;
use crate::error::{Result, SwarmError};
use crate::types::{RunId, Stage, TaskId, WorkerId};
use chrono::Utc;

impl SwarmDb {
    /// Append one invocation to the run's ledger. Never updated or deleted.
    pub async fn record_invocation(
        &self,
        run_id: RunId,
        stage: Stage,
        worker_id: &WorkerId,
        task_id: TaskId,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO invocations (run_id, stage, worker_id, task_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(run_id.value())
        .bind(stage.as_str())
        .bind(worker_id.value())
        .bind(task_id.value())
        .bind(Utc::now())
        .execute(self.pool())
        .await
        .map(|_result| ())
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to record invocation: {e}")))
    }

    pub async fn record_stage_attempt(
        &self,
        task_id: TaskId,
        stage: Stage,
        attempt_number: u32,
        success: bool,
        output: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO stage_attempts
                (task_id, stage, attempt_number, success, output, error, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(task_id.value())
        .bind(stage.as_str())
        .bind(i64::from(attempt_number))
        .bind(success)
        .bind(output)
        .bind(error)
        .bind(Utc::now())
        .execute(self.pool())
        .await
        .map(|_result| ())
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to record stage attempt: {e}")))
    }
}
