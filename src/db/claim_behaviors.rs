#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

// BDD-style tests for task claiming, release, stale reclaim and readiness.

use super::test_support::{seed_task, seed_task_with_status, test_db};
use crate::types::{ClaimOutcome, NewTask, TaskStatus, WorkerId};
use futures_util::future::join_all;
use std::time::Duration;

mod claiming {
    use super::*;

    mod when_many_workers_race_for_one_task {
        use super::*;

        #[tokio::test]
        async fn then_exactly_one_claim_succeeds() {
            // Given
            let (db, _dir) = test_db().await;
            let task_id = seed_task(&db, NewTask::new("race", 0, 1)).await;

            // When
            let attempts = (1..=20).map(|n| {
                let db = db.clone();
                async move {
                    let worker = WorkerId::new(format!("worker-{n}"));
                    db.claim_task(task_id, &worker, 300).await.unwrap_or(false)
                }
            });
            let results = join_all(attempts).await;

            // Then
            assert_eq!(results.iter().filter(|won| **won).count(), 1);

            let task = db
                .get_task(task_id)
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| unreachable!("task missing"));
            assert_eq!(task.status, TaskStatus::InProgress);
            assert!(task.claimed_by.is_some());

            let history = db.claim_history(task_id).await.unwrap_or_default();
            assert_eq!(history.len(), 1, "only the winner leaves an audit row");
            assert!(history[0].is_open());
        }
    }

    mod when_the_task_is_already_claimed {
        use super::*;

        #[tokio::test]
        async fn then_a_second_claim_returns_false_and_next_ready_skips_it() {
            let (db, _dir) = test_db().await;
            let task_id = seed_task(&db, NewTask::new("held", 0, 1)).await;
            let first = WorkerId::new("worker-1");
            let second = WorkerId::new("worker-2");

            assert!(db.claim_task(task_id, &first, 300).await.unwrap_or(false));
            assert!(!db.claim_task(task_id, &second, 300).await.unwrap_or(true));
            assert!(db.next_ready().await.ok().flatten().is_none());

            let history = db.claim_history(task_id).await.unwrap_or_default();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].worker_id, first);
        }
    }
}

mod releasing {
    use super::*;

    mod given_a_claim_held_by_another_worker {
        use super::*;

        #[tokio::test]
        async fn then_release_is_refused_and_the_claim_stays_intact() {
            let (db, _dir) = test_db().await;
            let task_id = seed_task(&db, NewTask::new("owned", 0, 1)).await;
            let owner = WorkerId::new("worker-1");
            let intruder = WorkerId::new("worker-2");
            assert!(db.claim_task(task_id, &owner, 300).await.unwrap_or(false));

            let released = db
                .release_task(task_id, &intruder, ClaimOutcome::Released)
                .await
                .unwrap_or(true);

            assert!(!released);
            let task = db.get_task(task_id).await.ok().flatten();
            assert_eq!(task.and_then(|t| t.claimed_by), Some(owner));
            let history = db.claim_history(task_id).await.unwrap_or_default();
            assert!(history.iter().all(|claim| claim.is_open()));
        }
    }

    mod given_the_owner_releases {
        use super::*;

        #[tokio::test]
        async fn then_claim_fields_clear_and_the_audit_row_closes() {
            let (db, _dir) = test_db().await;
            let task_id = seed_task(&db, NewTask::new("done", 0, 1)).await;
            let owner = WorkerId::new("worker-1");
            assert!(db.claim_task(task_id, &owner, 300).await.unwrap_or(false));
            let _ = db
                .update_task_status_if_owner(task_id, &owner, TaskStatus::Complete)
                .await;

            let released = db
                .release_task(task_id, &owner, ClaimOutcome::Completed)
                .await
                .unwrap_or(false);

            assert!(released);
            let task = db
                .get_task(task_id)
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| unreachable!("task missing"));
            assert_eq!(task.status, TaskStatus::Complete);
            assert!(task.claimed_by.is_none());
            assert!(task.claimed_at.is_none());
            assert!(task.claim_expires_at.is_none());

            let history = db.claim_history(task_id).await.unwrap_or_default();
            assert_eq!(history.len(), 1);
            assert!(history[0].released_at.is_some());
            assert_eq!(history[0].outcome, Some(ClaimOutcome::Completed));
        }

        #[tokio::test]
        async fn then_an_unfinished_task_returns_to_pending() {
            let (db, _dir) = test_db().await;
            let task_id = seed_task(&db, NewTask::new("retry-me", 0, 1)).await;
            let owner = WorkerId::new("worker-1");
            assert!(db.claim_task(task_id, &owner, 300).await.unwrap_or(false));

            assert!(db
                .release_task(task_id, &owner, ClaimOutcome::Failed)
                .await
                .unwrap_or(false));

            let ready = db.next_ready().await.ok().flatten();
            assert_eq!(ready.map(|task| task.id), Some(task_id));
        }
    }

    mod given_a_never_claimed_task {
        use super::*;

        #[tokio::test]
        async fn then_release_is_a_no_op() {
            let (db, _dir) = test_db().await;
            let task_id = seed_task(&db, NewTask::new("idle", 0, 1)).await;

            let released = db
                .release_task(task_id, &WorkerId::new("worker-1"), ClaimOutcome::Released)
                .await
                .unwrap_or(true);

            assert!(!released);
            assert!(db.claim_history(task_id).await.unwrap_or_default().is_empty());
        }
    }
}

mod stale_claims {
    use super::*;

    mod when_a_claim_expires {
        use super::*;

        #[tokio::test]
        async fn then_cleanup_returns_the_task_to_pending_for_another_worker() {
            let (db, _dir) = test_db().await;
            let task_id = seed_task(&db, NewTask::new("stale", 0, 1)).await;
            let crashed = WorkerId::new("worker-crashed");
            let rescuer = WorkerId::new("worker-rescuer");
            assert!(db.claim_task(task_id, &crashed, 1).await.unwrap_or(false));

            tokio::time::sleep(Duration::from_millis(1_200)).await;
            let reclaimed = db.cleanup_stale_claims().await.unwrap_or(0);

            assert_eq!(reclaimed, 1);
            let task = db
                .get_task(task_id)
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| unreachable!("task missing"));
            assert_eq!(task.status, TaskStatus::Pending);
            assert!(task.claimed_by.is_none());
            assert!(db.claim_task(task_id, &rescuer, 300).await.unwrap_or(false));

            let history = db.claim_history(task_id).await.unwrap_or_default();
            assert_eq!(history.len(), 2);
            assert_eq!(history[0].outcome, Some(ClaimOutcome::Timeout));
            assert!(history[1].is_open());
        }
    }

    mod when_the_claim_is_still_live {
        use super::*;

        #[tokio::test]
        async fn then_cleanup_leaves_it_alone() {
            let (db, _dir) = test_db().await;
            let task_id = seed_task(&db, NewTask::new("live", 0, 1)).await;
            assert!(db
                .claim_task(task_id, &WorkerId::new("worker-1"), 300)
                .await
                .unwrap_or(false));

            assert_eq!(db.cleanup_stale_claims().await.unwrap_or(99), 0);
        }
    }

    mod given_a_terminal_task_with_an_expired_lease {
        use super::*;

        #[tokio::test]
        async fn then_it_is_never_regressed() {
            let (db, _dir) = test_db().await;
            let task_id = seed_task(&db, NewTask::new("finished", 0, 1)).await;
            let owner = WorkerId::new("worker-1");
            assert!(db.claim_task(task_id, &owner, 1).await.unwrap_or(false));
            let _ = db.update_task_status(task_id, TaskStatus::Complete).await;

            tokio::time::sleep(Duration::from_millis(1_200)).await;
            let reclaimed = db.cleanup_stale_claims().await.unwrap_or(99);

            assert_eq!(reclaimed, 0);
            let status = db.get_task(task_id).await.ok().flatten().map(|t| t.status);
            assert_eq!(status, Some(TaskStatus::Complete));
        }
    }
}

mod readiness {
    use super::*;

    mod given_tasks_across_phases_and_sequences {
        use super::*;

        #[tokio::test]
        async fn then_the_lowest_phase_and_sequence_comes_first() {
            let (db, _dir) = test_db().await;
            seed_task(&db, NewTask::new("p1-s1", 1, 1)).await;
            seed_task(&db, NewTask::new("p0-s2", 0, 2)).await;
            seed_task(&db, NewTask::new("p0-s1", 0, 1)).await;

            let next = db.next_ready().await.ok().flatten();
            assert_eq!(next.map(|t| t.task_key.value().to_string()), Some("p0-s1".to_string()));

            let in_phase_one = db.next_ready_in_phase(1).await.ok().flatten();
            assert_eq!(
                in_phase_one.map(|t| t.task_key.value().to_string()),
                Some("p1-s1".to_string())
            );
        }
    }

    mod given_dependencies {
        use super::*;

        #[tokio::test]
        async fn then_a_task_waits_until_every_dependency_passes_or_completes() {
            let (db, _dir) = test_db().await;
            let base = seed_task(&db, NewTask::new("base", 0, 1)).await;
            let other = seed_task(&db, NewTask::new("other", 0, 2)).await;
            let _ = db.update_task_status(other, TaskStatus::Complete).await;
            seed_task(&db, NewTask::new("child", 0, 3).depends_on(["base", "other"])).await;
            let _ = db.update_task_status(base, TaskStatus::Blocked).await;

            assert!(db.next_ready().await.ok().flatten().is_none());

            let _ = db.update_task_status(base, TaskStatus::Passing).await;
            let next = db.next_ready().await.ok().flatten();
            assert_eq!(next.map(|t| t.task_key.value().to_string()), Some("child".to_string()));
        }

        #[tokio::test]
        async fn then_a_cycle_yields_no_ready_task() {
            let (db, _dir) = test_db().await;
            let a = seed_task(&db, NewTask::new("a", 0, 1).depends_on(["b"])).await;
            seed_task(&db, NewTask::new("b", 0, 2).depends_on(["a"])).await;

            assert!(db.next_ready().await.ok().flatten().is_none());
            assert_eq!(db.orphaned_tasks().await.unwrap_or_default().len(), 2);

            // Breaking the cycle by hand frees the other side.
            let _ = db.update_task_status(a, TaskStatus::Complete).await;
            let next = db.next_ready().await.ok().flatten();
            assert_eq!(next.map(|t| t.task_key.value().to_string()), Some("b".to_string()));
        }

        #[tokio::test]
        async fn then_an_unknown_dependency_is_never_satisfied() {
            let (db, _dir) = test_db().await;
            seed_task(&db, NewTask::new("lonely", 0, 1).depends_on(["ghost"])).await;

            assert!(db.next_ready().await.ok().flatten().is_none());
        }
    }

    mod given_mixed_statuses {
        use super::*;

        #[tokio::test]
        async fn then_phase_listing_and_in_flight_counts_reflect_the_store() {
            let (db, _dir) = test_db().await;
            seed_task_with_status(&db, NewTask::new("p0-done", 0, 1), TaskStatus::Complete).await;
            let running = seed_task(&db, NewTask::new("p1-run", 1, 1)).await;
            seed_task(&db, NewTask::new("p2-wait", 2, 1)).await;
            assert!(db
                .claim_task(running, &WorkerId::new("worker-1"), 300)
                .await
                .unwrap_or(false));

            assert_eq!(db.phases().await.unwrap_or_default(), vec![0, 1, 2]);
            assert_eq!(db.count_in_flight(1).await.unwrap_or(0), 1);
            assert_eq!(db.count_in_flight(2).await.unwrap_or(9), 0);
            assert_eq!(db.tasks_before_phase(2).await.unwrap_or_default().len(), 2);
            assert_eq!(db.tasks_in_phase(2).await.unwrap_or_default().len(), 1);
        }
    }
}
