#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::db::mappers::{encode_string_list, to_i64_u64};
use crate::db::SwarmDb;
use crate::error::{Result, SwarmError};
use crate::types::{CasOutcome, ClaimOutcome, NewTask, TaskId, TaskKey, TaskStatus, WorkerId};
use chrono::{DateTime, Duration, Utc};
use sqlx::Acquire;
use tracing::{debug, info};

/// Longest lease a claim can carry.
const MAX_CLAIM_TIMEOUT_SECS: u64 = 7 * 86_400;

fn claim_expiry(now: DateTime<Utc>, timeout_secs: u64) -> DateTime<Utc> {
    now + Duration::seconds(to_i64_u64(timeout_secs.min(MAX_CLAIM_TIMEOUT_SECS)))
}

impl SwarmDb {
    /// # Errors
    /// Returns an error if the task key already exists or the insert fails.
    pub async fn insert_task(&self, task: &NewTask) -> Result<TaskId> {
        let depends_on = encode_string_list(
            &task
                .depends_on
                .iter()
                .map(TaskKey::value)
                .collect::<Vec<_>>(),
        )?;
        let acceptance_criteria = encode_string_list(&task.acceptance_criteria)?;
        let module_exports = encode_string_list(&task.module_exports)?;

        sqlx::query(
            "INSERT INTO tasks
                (task_key, title, goal, test_file, impl_file, phase, sequence,
                 depends_on, acceptance_criteria, module_exports)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(task.task_key.value())
        .bind(&task.title)
        .bind(&task.goal)
        .bind(&task.test_file)
        .bind(&task.impl_file)
        .bind(task.phase)
        .bind(task.sequence)
        .bind(depends_on)
        .bind(acceptance_criteria)
        .bind(module_exports)
        .execute(self.pool())
        .await
        .map(|result| TaskId::new(result.last_insert_rowid()))
        .map_err(|e| {
            SwarmError::DatabaseError(format!("Failed to insert task {}: {e}", task.task_key))
        })
    }

    /// Atomically claim a pending, unclaimed task.
    ///
    /// Exactly one of any number of racing callers sees `true`; the rest see
    /// `false`. A successful claim opens one audit row in `task_claims`.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn claim_task(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
        timeout_secs: u64,
    ) -> Result<bool> {
        let now = Utc::now();
        let expires_at = claim_expiry(now, timeout_secs);

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to begin tx: {e}")))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to acquire tx conn: {e}")))?;

        let outcome = sqlx::query(
            "UPDATE tasks
             SET status = 'in_progress',
                 claimed_by = ?1,
                 claimed_at = ?2,
                 claim_expires_at = ?3,
                 updated_at = ?2
             WHERE id = ?4
               AND status = 'pending'
               AND claimed_by IS NULL",
        )
        .bind(worker_id.value())
        .bind(now)
        .bind(expires_at)
        .bind(task_id.value())
        .execute(&mut *conn)
        .await
        .map(|result| CasOutcome::from_rows_affected(result.rows_affected()))
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to claim task: {e}")))?;

        if !outcome.applied() {
            tx.rollback()
                .await
                .map_err(|e| SwarmError::DatabaseError(format!("Failed to rollback tx: {e}")))?;
            debug!(task_id = task_id.value(), worker_id = %worker_id, "Claim lost");
            return Ok(false);
        }

        sqlx::query("INSERT INTO task_claims (task_id, worker_id, claimed_at) VALUES (?1, ?2, ?3)")
            .bind(task_id.value())
            .bind(worker_id.value())
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to record claim: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to commit tx: {e}")))?;

        info!(task_id = task_id.value(), worker_id = %worker_id, "Task claimed");
        Ok(true)
    }

    /// Release a claim held by `worker_id`.
    ///
    /// Returns `false` without touching anything when the caller does not own
    /// the claim. A task still `in_progress` goes back to `pending`; terminal
    /// statuses are kept.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn release_task(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
        outcome: ClaimOutcome,
    ) -> Result<bool> {
        let now = Utc::now();

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to begin tx: {e}")))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to acquire tx conn: {e}")))?;

        let released = sqlx::query(
            "UPDATE tasks
             SET claimed_by = NULL,
                 claimed_at = NULL,
                 claim_expires_at = NULL,
                 status = CASE WHEN status = 'in_progress' THEN 'pending' ELSE status END,
                 updated_at = ?1
             WHERE id = ?2
               AND claimed_by = ?3",
        )
        .bind(now)
        .bind(task_id.value())
        .bind(worker_id.value())
        .execute(&mut *conn)
        .await
        .map(|result| CasOutcome::from_rows_affected(result.rows_affected()))
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to release task: {e}")))?;

        if !released.applied() {
            tx.rollback()
                .await
                .map_err(|e| SwarmError::DatabaseError(format!("Failed to rollback tx: {e}")))?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE task_claims
             SET released_at = ?1, outcome = ?2
             WHERE task_id = ?3
               AND worker_id = ?4
               AND released_at IS NULL",
        )
        .bind(now)
        .bind(outcome.as_str())
        .bind(task_id.value())
        .bind(worker_id.value())
        .execute(&mut *conn)
        .await
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to close claim record: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to commit tx: {e}")))?;

        info!(
            task_id = task_id.value(),
            worker_id = %worker_id,
            outcome = outcome.as_str(),
            "Task released"
        );
        Ok(true)
    }

    /// Return expired `in_progress` claims to `pending` and close their audit
    /// rows with outcome `timeout`.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn cleanup_stale_claims(&self) -> Result<u64> {
        let now = Utc::now();

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to begin tx: {e}")))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to acquire tx conn: {e}")))?;

        sqlx::query(
            "UPDATE task_claims
             SET released_at = ?1, outcome = 'timeout'
             WHERE released_at IS NULL
               AND task_id IN (
                   SELECT id FROM tasks
                   WHERE status = 'in_progress'
                     AND claim_expires_at IS NOT NULL
                     AND julianday(claim_expires_at) < julianday(?1)
               )",
        )
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to expire claim records: {e}")))?;

        let reclaimed = sqlx::query(
            "UPDATE tasks
             SET status = 'pending',
                 claimed_by = NULL,
                 claimed_at = NULL,
                 claim_expires_at = NULL,
                 updated_at = ?1
             WHERE status = 'in_progress'
               AND claim_expires_at IS NOT NULL
               AND julianday(claim_expires_at) < julianday(?1)",
        )
        .bind(now)
        .execute(&mut *conn)
        .await
        .map(|result| result.rows_affected())
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to clean stale claims: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to commit tx: {e}")))?;

        if reclaimed > 0 {
            info!(reclaimed, "Reclaimed stale task claims");
        }
        Ok(reclaimed)
    }

    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn update_task_status(&self, task_id: TaskId, status: TaskStatus) -> Result<CasOutcome> {
        sqlx::query("UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(task_id.value())
            .execute(self.pool())
            .await
            .map(|result| CasOutcome::from_rows_affected(result.rows_affected()))
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to update task status: {e}")))
    }

    /// Status change that only lands while `worker_id` still owns the claim.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn update_task_status_if_owner(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
        status: TaskStatus,
    ) -> Result<CasOutcome> {
        sqlx::query(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3 AND claimed_by = ?4",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(task_id.value())
        .bind(worker_id.value())
        .execute(self.pool())
        .await
        .map(|result| CasOutcome::from_rows_affected(result.rows_affected()))
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to update owned task status: {e}")))
    }

    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn increment_retry_count(&self, task_id: TaskId) -> Result<()> {
        sqlx::query("UPDATE tasks SET retry_count = retry_count + 1, updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(task_id.value())
            .execute(self.pool())
            .await
            .map(|_result| ())
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to increment retry count: {e}")))
    }
}
