#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::db::mappers::parse_execution_run;
use crate::db::SwarmDb;
use crate::error::{Result, SwarmError};
use crate::types::{ExecutionRun, RunId};

use super::types::ExecutionRunRow;

impl SwarmDb {
    pub async fn get_execution_run(&self, run_id: RunId) -> Result<Option<ExecutionRun>> {
        sqlx::query_as::<_, ExecutionRunRow>(
            "SELECT id, max_workers, started_at, validation_status, validation_details
             FROM execution_runs WHERE id = ?1",
        )
        .bind(run_id.value())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to get execution run: {e}")))
        .and_then(|row| row.map(parse_execution_run).transpose())
    }
}
