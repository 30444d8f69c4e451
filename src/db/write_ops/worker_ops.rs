#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::db::mappers::to_i64_u64;
use crate::db::SwarmDb;
use crate::error::{Result, SwarmError};
use crate::types::{TaskId, WorkerId};
use chrono::{Duration, Utc};
use sqlx::Acquire;
use tracing::warn;

impl SwarmDb {
    /// Register (or re-activate) a worker.
    pub async fn register_worker(&self, worker_id: &WorkerId) -> Result<()> {
        sqlx::query(
            "INSERT INTO workers (worker_id, status, last_heartbeat, current_task_id)
             VALUES (?1, 'active', ?2, NULL)
             ON CONFLICT (worker_id) DO UPDATE SET
                 status = 'active',
                 last_heartbeat = excluded.last_heartbeat,
                 current_task_id = NULL",
        )
        .bind(worker_id.value())
        .bind(Utc::now())
        .execute(self.pool())
        .await
        .map(|_result| ())
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to register worker: {e}")))
    }

    /// Refresh `last_heartbeat` and the current task, and append to the heartbeat log.
    pub async fn record_heartbeat(
        &self,
        worker_id: &WorkerId,
        current_task_id: Option<TaskId>,
    ) -> Result<()> {
        let now = Utc::now();
        let task_id = current_task_id.map(|task_id| task_id.value());

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
            "UPDATE workers
             SET last_heartbeat = ?1, current_task_id = ?2, status = 'active'
             WHERE worker_id = ?3",
        )
        .bind(now)
        .bind(task_id)
        .bind(worker_id.value())
        .execute(&mut *conn)
        .await
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to update heartbeat: {e}")))?;

        sqlx::query("INSERT INTO worker_heartbeats (worker_id, task_id, beat_at) VALUES (?1, ?2, ?3)")
            .bind(worker_id.value())
            .bind(task_id)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to log heartbeat: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to commit tx: {e}")))
    }

    pub async fn set_worker_task(
        &self,
        worker_id: &WorkerId,
        current_task_id: Option<TaskId>,
    ) -> Result<()> {
        sqlx::query("UPDATE workers SET current_task_id = ?1 WHERE worker_id = ?2")
            .bind(current_task_id.map(|task_id| task_id.value()))
            .bind(worker_id.value())
            .execute(self.pool())
            .await
            .map(|_result| ())
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to set worker task: {e}")))
    }

    /// Leave the registration `idle` with no current task.
    pub async fn mark_worker_idle(&self, worker_id: &WorkerId) -> Result<()> {
        sqlx::query(
            "UPDATE workers SET status = 'idle', current_task_id = NULL WHERE worker_id = ?1",
        )
        .bind(worker_id.value())
        .execute(self.pool())
        .await
        .map(|_result| ())
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to mark worker idle: {e}")))
    }

    /// Mark active workers whose heartbeat is older than `stale_after_secs` as dead.
    pub async fn reap_dead_workers(&self, stale_after_secs: u64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::seconds(to_i64_u64(stale_after_secs.min(86_400 * 30)));
        let reaped = sqlx::query(
            "UPDATE workers
             SET status = 'dead', current_task_id = NULL
             WHERE status = 'active'
               AND julianday(last_heartbeat) < julianday(?1)",
        )
        .bind(cutoff)
        .execute(self.pool())
        .await
        .map(|result| result.rows_affected())
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to reap dead workers: {e}")))?;

        if reaped > 0 {
            warn!(reaped, "Marked unresponsive workers dead");
        }
        Ok(reaped)
    }
}
