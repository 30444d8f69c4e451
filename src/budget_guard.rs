#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::db::SwarmDb;
use crate::error::Result;
use crate::types::{BudgetCheck, BudgetLimit, RunId, Stage, TaskId, WorkerId};
use tracing::warn;

/// Caps the number of stage invocations a run may spend.
///
/// The count is read from the append-only ledger on every check, so all
/// workers sharing the store see the same budget.
#[derive(Clone)]
pub struct InvocationBudgetGuard {
    db: SwarmDb,
    limit: BudgetLimit,
}

impl InvocationBudgetGuard {
    #[must_use]
    pub const fn new(db: SwarmDb, limit: BudgetLimit) -> Self {
        Self { db, limit }
    }

    #[must_use]
    pub const fn limit(&self) -> BudgetLimit {
        self.limit
    }

    /// # Errors
    /// Returns an error if the ledger cannot be written.
    pub async fn record(
        &self,
        run_id: RunId,
        stage: Stage,
        worker_id: &WorkerId,
        task_id: TaskId,
    ) -> Result<()> {
        self.db
            .record_invocation(run_id, stage, worker_id, task_id)
            .await
    }

    /// # Errors
    /// Returns an error if the ledger cannot be read.
    pub async fn check(&self, run_id: RunId) -> Result<BudgetCheck> {
        let count = self.db.count_invocations(run_id).await?;
        let check = self.limit.evaluate(count);
        if check.warning {
            warn!(
                run_id = run_id.value(),
                count = check.count,
                limit = check.limit,
                "Invocation budget nearly spent"
            );
        }
        Ok(check)
    }

    /// Gate for one stage call: read the budget, then record the attempt.
    ///
    /// The attempt is recorded even when the budget is already spent; the
    /// returned check reflects the count before this attempt, so the caller
    /// must not contact the agent when it reports exhaustion.
    ///
    /// # Errors
    /// Returns an error if the ledger cannot be read or written.
    pub async fn admit(
        &self,
        run_id: RunId,
        stage: Stage,
        worker_id: &WorkerId,
        task_id: TaskId,
    ) -> Result<BudgetCheck> {
        let check = self.check(run_id).await?;
        self.record(run_id, stage, worker_id, task_id).await?;
        Ok(check)
    }
}
