#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::db::SwarmDb;
use crate::error::{Result, SwarmError};
use crate::types::{CasOutcome, RunId, ValidationStatus};
use chrono::Utc;

impl SwarmDb {
    pub async fn create_execution_run(&self, max_workers: u32) -> Result<RunId> {
        sqlx::query("INSERT INTO execution_runs (max_workers, started_at) VALUES (?1, ?2)")
            .bind(i64::from(max_workers))
            .bind(Utc::now())
            .execute(self.pool())
            .await
            .map(|result| RunId::new(result.last_insert_rowid()))
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to create execution run: {e}")))
    }

    /// Persist the validation verdict. Only the first call for a run applies.
    pub async fn finalize_run_validation(
        &self,
        run_id: RunId,
        status: ValidationStatus,
        details: &serde_json::Value,
    ) -> Result<CasOutcome> {
        sqlx::query(
            "UPDATE execution_runs
             SET validation_status = ?1, validation_details = ?2, validated_at = ?3
             WHERE id = ?4 AND validation_status = 'pending'",
        )
        .bind(status.as_str())
        .bind(details.to_string())
        .bind(Utc::now())
        .bind(run_id.value())
        .execute(self.pool())
        .await
        .map(|result| CasOutcome::from_rows_affected(result.rows_affected()))
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to finalize run validation: {e}")))
    }
}
