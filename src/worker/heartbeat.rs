#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::db::SwarmDb;
use crate::types::{TaskId, WorkerId};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Background liveness loop for one worker.
///
/// Each tick refreshes `last_heartbeat` and the current task. Store failures
/// are logged and the loop keeps going. Dropping the handle also ends the
/// loop, since the shutdown sender goes away with it.
pub struct HeartbeatHandle {
    shutdown: watch::Sender<bool>,
    current_task: watch::Sender<Option<TaskId>>,
    join: JoinHandle<()>,
}

impl HeartbeatHandle {
    #[must_use]
    pub fn start(db: SwarmDb, worker_id: WorkerId, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let (current_task, task_rx) = watch::channel(None::<TaskId>);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let task_id = *task_rx.borrow();
                        if let Err(e) = db.record_heartbeat(&worker_id, task_id).await {
                            warn!(worker_id = %worker_id, error = %e, "Heartbeat write failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(worker_id = %worker_id, "Heartbeat loop stopped");
        });

        Self {
            shutdown,
            current_task,
            join,
        }
    }

    pub fn set_task(&self, task_id: Option<TaskId>) {
        self.current_task.send_replace(task_id);
    }

    /// Stop the loop and wait for it to finish its current beat.
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.join.await {
            warn!(error = %e, "Heartbeat task ended abnormally");
        }
    }
}
