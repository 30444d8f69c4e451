#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

// BDD-style tests for breaker persistence: version-checked writes, health
// aggregation and the event log.

use super::test_support::test_db;
use super::CircuitTransition;
use crate::types::{
    CasOutcome, CircuitConfig, CircuitEventType, CircuitLevel, CircuitState, HealthStatus,
};
use chrono::Utc;

mod versioned_writes {
    use super::*;

    mod when_two_writers_start_from_the_same_version {
        use super::*;

        #[tokio::test]
        async fn then_only_the_first_write_lands() {
            let (db, _dir) = test_db().await;
            let config = CircuitConfig::default();
            let original = db
                .ensure_circuit(CircuitLevel::Task, "t1")
                .await
                .unwrap_or_else(|e| unreachable!("ensure failed: {e}"));
            let now = Utc::now();

            let first = CircuitTransition::new(
                &original,
                original.clone().record_failure(&config, now),
                Some(CircuitEventType::FailureRecorded),
                now,
            );
            let second = CircuitTransition::new(
                &original,
                original.clone().record_success(&config, now),
                Some(CircuitEventType::SuccessRecorded),
                now,
            );

            assert_eq!(
                db.apply_circuit_transition(&first).await.ok(),
                Some(CasOutcome::Applied)
            );
            assert_eq!(
                db.apply_circuit_transition(&second).await.ok(),
                Some(CasOutcome::Rejected)
            );

            let stored = db.get_circuit(CircuitLevel::Task, "t1").await.ok().flatten();
            assert_eq!(stored.as_ref().map(|c| c.failure_count), Some(1));
            assert_eq!(stored.map(|c| c.version), Some(1));

            let history = db.circuit_history(original.id, 10).await.unwrap_or_default();
            assert_eq!(history.len(), 1, "rejected writes leave no events");
        }
    }

    #[tokio::test]
    async fn ensure_circuit_is_idempotent() {
        let (db, _dir) = test_db().await;
        let first = db.ensure_circuit(CircuitLevel::Stage, "green").await.ok();
        let second = db.ensure_circuit(CircuitLevel::Stage, "green").await.ok();

        assert_eq!(first.as_ref().map(|c| c.id), second.as_ref().map(|c| c.id));
        assert_eq!(first.map(|c| c.state), Some(CircuitState::Closed));
        assert_eq!(db.list_circuits().await.unwrap_or_default().len(), 1);
    }
}

mod health_views {
    use super::*;

    async fn force_state(db: &crate::db::SwarmDb, identifier: &str, state: CircuitState) {
        let record = db
            .ensure_circuit(CircuitLevel::Task, identifier)
            .await
            .unwrap_or_else(|e| unreachable!("ensure failed: {e}"));
        let mut next = record.clone();
        next.state = state;
        next.version += 1;
        let now = Utc::now();
        let _ = db
            .apply_circuit_transition(&CircuitTransition::new(&record, next, None, now))
            .await;
    }

    #[tokio::test]
    async fn half_or_more_open_is_unhealthy() {
        let (db, _dir) = test_db().await;
        force_state(&db, "a", CircuitState::Open).await;
        force_state(&db, "b", CircuitState::Closed).await;

        let health = db.circuit_health(Some(CircuitLevel::Task)).await.ok();
        assert_eq!(health.map(|h| h.status), Some(HealthStatus::Unhealthy));
        assert_eq!(db.open_circuits().await.unwrap_or_default().len(), 1);
    }

    #[tokio::test]
    async fn any_half_open_below_threshold_is_degraded() {
        let (db, _dir) = test_db().await;
        force_state(&db, "a", CircuitState::HalfOpen).await;
        force_state(&db, "b", CircuitState::Closed).await;
        force_state(&db, "c", CircuitState::Closed).await;

        let health = db.circuit_health(None).await.ok();
        assert_eq!(health.map(|h| h.status), Some(HealthStatus::Degraded));
        assert_eq!(health.map(|h| h.closed), Some(2));
    }

    #[tokio::test]
    async fn no_breakers_is_unknown() {
        let (db, _dir) = test_db().await;
        let health = db.circuit_health(Some(CircuitLevel::System)).await.ok();
        assert_eq!(health.map(|h| h.status), Some(HealthStatus::Unknown));
    }

    #[tokio::test]
    async fn repeated_state_changes_show_up_as_flapping() {
        let (db, _dir) = test_db().await;
        for state in [
            CircuitState::Open,
            CircuitState::HalfOpen,
            CircuitState::Open,
            CircuitState::HalfOpen,
        ] {
            force_state(&db, "flappy", state).await;
        }
        force_state(&db, "steady", CircuitState::Open).await;

        let flapping = db
            .flapping_circuits(300, 3, Utc::now())
            .await
            .unwrap_or_default();

        assert_eq!(flapping.len(), 1);
        assert_eq!(flapping[0].identifier, "flappy");
        assert_eq!(flapping[0].state_changes, 4);
    }
}
