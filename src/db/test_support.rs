#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use super::SwarmDb;
use crate::types::{NewTask, TaskId, TaskStatus};
use tempfile::TempDir;

/// A schema-initialised database in a throwaway directory. Keep the
/// `TempDir` alive for as long as the database is used.
pub(crate) async fn test_db() -> (SwarmDb, TempDir) {
    let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir failed: {e}"));
    let url = format!("sqlite://{}", dir.path().join("swarm.db").display());
    let db = SwarmDb::new(&url)
        .await
        .unwrap_or_else(|e| unreachable!("Failed to open test database: {e}"));
    db.initialize_schema()
        .await
        .unwrap_or_else(|e| unreachable!("Failed to initialize schema: {e}"));
    (db, dir)
}

pub(crate) async fn seed_task(db: &SwarmDb, task: NewTask) -> TaskId {
    let key = task.task_key.clone();
    db.insert_task(&task)
        .await
        .unwrap_or_else(|e| unreachable!("insert {key} failed: {e}"))
}

pub(crate) async fn seed_task_with_status(db: &SwarmDb, task: NewTask, status: TaskStatus) -> TaskId {
    let task_id = seed_task(db, task).await;
    db.update_task_status(task_id, status)
        .await
        .unwrap_or_else(|e| unreachable!("status update failed: {e}"));
    task_id
}
