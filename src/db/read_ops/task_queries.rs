#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::db::mappers::{parse_claim, parse_task, to_u64_i64};
use crate::db::SwarmDb;
use crate::error::{Result, SwarmError};
use crate::types::{ClaimRecord, Task, TaskId, TaskKey};
use chrono::Utc;

use super::types::{ClaimRow, TaskRow};

pub(crate) const TASK_COLUMNS: &str = "id, task_key, title, goal, test_file, impl_file, status, \
     phase, sequence, depends_on, claimed_by, claimed_at, claim_expires_at, retry_count, \
     acceptance_criteria, module_exports";

// ?1 = now, ?2 = optional phase filter. A dependency key with no matching
// task counts as unsatisfied, so dangling references never become ready.
const NEXT_READY_SQL: &str = "SELECT id, task_key, title, goal, test_file, impl_file, status,
        phase, sequence, depends_on, claimed_by, claimed_at, claim_expires_at, retry_count,
        acceptance_criteria, module_exports
 FROM tasks t
 WHERE t.status = 'pending'
   AND (?2 IS NULL OR t.phase = ?2)
   AND (t.claimed_by IS NULL
        OR t.claim_expires_at IS NULL
        OR julianday(t.claim_expires_at) <= julianday(?1))
   AND NOT EXISTS (
        SELECT 1
        FROM json_each(t.depends_on) d
        WHERE NOT EXISTS (
            SELECT 1
            FROM tasks dep
            WHERE dep.task_key = d.value
              AND dep.status IN ('passing', 'complete')
        )
   )
 ORDER BY t.phase, t.sequence, t.id
 LIMIT 1";

impl SwarmDb {
    /// Lowest `(phase, sequence)` pending task whose dependencies are all
    /// `passing` or `complete`. `None` with pending tasks left means the
    /// remaining work is blocked or cyclic.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn next_ready(&self) -> Result<Option<Task>> {
        self.next_ready_filtered(None).await
    }

    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn next_ready_in_phase(&self, phase: i64) -> Result<Option<Task>> {
        self.next_ready_filtered(Some(phase)).await
    }

    async fn next_ready_filtered(&self, phase: Option<i64>) -> Result<Option<Task>> {
        sqlx::query_as::<_, TaskRow>(NEXT_READY_SQL)
            .bind(Utc::now())
            .bind(phase)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to select next ready task: {e}")))
            .and_then(|row| row.map(parse_task).transpose())
    }

    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn get_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        sqlx::query_as::<_, TaskRow>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))
            .bind(task_id.value())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to get task: {e}")))
            .and_then(|row| row.map(parse_task).transpose())
    }

    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn get_task_by_key(&self, task_key: &TaskKey) -> Result<Option<Task>> {
        sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_key = ?1"
        ))
        .bind(task_key.value())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to get task by key: {e}")))
        .and_then(|row| row.map(parse_task).transpose())
    }

    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        self.fetch_tasks(
            &format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY phase, sequence, id"),
            None,
        )
        .await
    }

    /// Tasks in every phase strictly before `phase`.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn tasks_before_phase(&self, phase: i64) -> Result<Vec<Task>> {
        self.fetch_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE phase < ?1 ORDER BY phase, sequence, id"
            ),
            Some(phase),
        )
        .await
    }

    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn tasks_in_phase(&self, phase: i64) -> Result<Vec<Task>> {
        self.fetch_tasks(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE phase = ?1 ORDER BY sequence, id"),
            Some(phase),
        )
        .await
    }

    /// Tasks left `pending` or `blocked`.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn orphaned_tasks(&self) -> Result<Vec<Task>> {
        self.fetch_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE status IN ('pending', 'blocked')
                 ORDER BY phase, sequence, id"
            ),
            None,
        )
        .await
    }

    async fn fetch_tasks(&self, sql: &str, phase: Option<i64>) -> Result<Vec<Task>> {
        let query = sqlx::query_as::<_, TaskRow>(sql);
        let query = match phase {
            Some(phase) => query.bind(phase),
            None => query,
        };
        query
            .fetch_all(self.pool())
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to list tasks: {e}")))
            .and_then(|rows| rows.into_iter().map(parse_task).collect())
    }

    /// Distinct phases in ascending order.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn phases(&self) -> Result<Vec<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT DISTINCT phase FROM tasks ORDER BY phase")
            .fetch_all(self.pool())
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to list phases: {e}")))
    }

    /// Claimed tasks in `phase` still being worked: `in_progress`, or
    /// `passing` while VERIFY or a GREEN retry runs.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn count_in_flight(&self, phase: i64) -> Result<u64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM tasks
             WHERE phase = ?1
               AND claimed_by IS NOT NULL
               AND status IN ('in_progress', 'passing')",
        )
        .bind(phase)
        .fetch_one(self.pool())
        .await
        .map(to_u64_i64)
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to count in-flight tasks: {e}")))
    }

    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn count_tasks(&self) -> Result<u64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tasks")
            .fetch_one(self.pool())
            .await
            .map(to_u64_i64)
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to count tasks: {e}")))
    }

    /// Audit trail of claim cycles for a task, oldest first.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn claim_history(&self, task_id: TaskId) -> Result<Vec<ClaimRecord>> {
        sqlx::query_as::<_, ClaimRow>(
            "SELECT id, task_id, worker_id, claimed_at, released_at, outcome
             FROM task_claims
             WHERE task_id = ?1
             ORDER BY id",
        )
        .bind(task_id.value())
        .fetch_all(self.pool())
        .await
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to get claim history: {e}")))
        .and_then(|rows| rows.into_iter().map(parse_claim).collect())
    }
}
