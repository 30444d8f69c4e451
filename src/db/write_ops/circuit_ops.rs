#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::db::SwarmDb;
use crate::error::{Result, SwarmError};
use crate::types::{CasOutcome, CircuitBreakerRecord, CircuitEventType, CircuitLevel, CircuitState};
use chrono::{DateTime, Utc};
use sqlx::Acquire;

/// A version-checked move of one breaker row plus the events it appends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitTransition {
    pub expected_version: i64,
    pub next: CircuitBreakerRecord,
    pub events: Vec<(CircuitEventType, CircuitState, CircuitState)>,
    pub at: DateTime<Utc>,
}

impl CircuitTransition {
    /// `event` is logged as-is; a `state_change` entry is added whenever the
    /// state actually moved.
    #[must_use]
    pub fn new(
        previous: &CircuitBreakerRecord,
        next: CircuitBreakerRecord,
        event: Option<CircuitEventType>,
        at: DateTime<Utc>,
    ) -> Self {
        let mut events = event
            .map(|event| vec![(event, previous.state, next.state)])
            .unwrap_or_default();
        if previous.state != next.state {
            events.push((CircuitEventType::StateChange, previous.state, next.state));
        }
        Self {
            expected_version: previous.version,
            next,
            events,
            at,
        }
    }

    #[must_use]
    pub fn changes_state(&self) -> bool {
        self.events
            .iter()
            .any(|(event, _, _)| *event == CircuitEventType::StateChange)
    }
}

impl SwarmDb {
    /// Fetch the breaker for `(level, identifier)`, creating a closed one if absent.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn ensure_circuit(
        &self,
        level: CircuitLevel,
        identifier: &str,
    ) -> Result<CircuitBreakerRecord> {
        sqlx::query(
            "INSERT INTO circuit_breakers (level, identifier) VALUES (?1, ?2)
             ON CONFLICT (level, identifier) DO NOTHING",
        )
        .bind(level.as_str())
        .bind(identifier)
        .execute(self.pool())
        .await
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to create circuit breaker: {e}")))?;

        self.get_circuit(level, identifier).await?.ok_or_else(|| {
            SwarmError::DatabaseError(format!("Circuit breaker {level}:{identifier} vanished"))
        })
    }

    /// Write `transition.next` only if the row still carries
    /// `transition.expected_version`, appending its events in the same
    /// transaction. A concurrent writer makes this `Rejected`.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn apply_circuit_transition(
        &self,
        transition: &CircuitTransition,
    ) -> Result<CasOutcome> {
        let next = &transition.next;

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
            "UPDATE circuit_breakers
             SET state = ?1,
                 failure_count = ?2,
                 success_count = ?3,
                 opened_at = ?4,
                 last_failure_at = ?5,
                 last_success_at = ?6,
                 version = ?7
             WHERE id = ?8 AND version = ?9",
        )
        .bind(next.state.as_str())
        .bind(i64::from(next.failure_count))
        .bind(i64::from(next.success_count))
        .bind(next.opened_at)
        .bind(next.last_failure_at)
        .bind(next.last_success_at)
        .bind(next.version)
        .bind(next.id)
        .bind(transition.expected_version)
        .execute(&mut *conn)
        .await
        .map(|result| CasOutcome::from_rows_affected(result.rows_affected()))
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to update circuit breaker: {e}")))?;

        if !outcome.applied() {
            tx.rollback()
                .await
                .map_err(|e| SwarmError::DatabaseError(format!("Failed to rollback tx: {e}")))?;
            return Ok(outcome);
        }

        for (event_type, from_state, to_state) in &transition.events {
            sqlx::query(
                "INSERT INTO circuit_breaker_events
                    (circuit_id, event_type, from_state, to_state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(next.id)
            .bind(event_type.as_str())
            .bind(from_state.as_str())
            .bind(to_state.as_str())
            .bind(transition.at)
            .execute(&mut *conn)
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to append circuit event: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| SwarmError::DatabaseError(format!("Failed to commit tx: {e}")))
            .map(|()| outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::CircuitTransition;
    use crate::types::{CircuitBreakerRecord, CircuitConfig, CircuitEventType, CircuitLevel, CircuitState};
    use chrono::Utc;

    #[test]
    fn opening_transition_logs_failure_and_state_change() {
        let config = CircuitConfig::new(1, 1, 60, 300);
        let previous = CircuitBreakerRecord::new(CircuitLevel::Task, "t1");
        let now = Utc::now();
        let next = previous.clone().record_failure(&config, now);

        let transition =
            CircuitTransition::new(&previous, next, Some(CircuitEventType::FailureRecorded), now);

        assert_eq!(transition.expected_version, 0);
        assert!(transition.changes_state());
        assert_eq!(
            transition.events,
            vec![
                (CircuitEventType::FailureRecorded, CircuitState::Closed, CircuitState::Open),
                (CircuitEventType::StateChange, CircuitState::Closed, CircuitState::Open),
            ]
        );
    }

    #[test]
    fn counting_failure_has_no_state_change() {
        let config = CircuitConfig::default();
        let previous = CircuitBreakerRecord::new(CircuitLevel::Stage, "green");
        let next = previous.clone().record_failure(&config, Utc::now());
        let transition =
            CircuitTransition::new(&previous, next, Some(CircuitEventType::FailureRecorded), Utc::now());
        assert!(!transition.changes_state());
        assert_eq!(transition.events.len(), 1);
    }
}
