#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::db::mappers::{parse_circuit, parse_circuit_event, parse_flapping, to_i64_u64, to_u64_i64};
use crate::db::SwarmDb;
use crate::error::{Result, SwarmError};
use crate::types::{
    CircuitBreakerEvent, CircuitBreakerRecord, CircuitLevel, FlappingCircuit, HealthSummary,
};
use chrono::{DateTime, Utc};

use super::types::{CircuitEventRow, CircuitHealthRow, CircuitRow, FlappingRow};

const CIRCUIT_COLUMNS: &str = "id, level, identifier, state, failure_count, success_count, \
     opened_at, last_failure_at, last_success_at, version";

impl SwarmDb {
    pub async fn get_circuit(
        &self,
        level: CircuitLevel,
        identifier: &str,
    ) -> Result<Option<CircuitBreakerRecord>> {
        sqlx::query_as::<_, CircuitRow>(&format!(
            "SELECT {CIRCUIT_COLUMNS} FROM circuit_breakers WHERE level = ?1 AND identifier = ?2"
        ))
        .bind(level.as_str())
        .bind(identifier)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to get circuit breaker: {e}")))
        .and_then(|row| row.map(parse_circuit).transpose())
    }

    pub async fn list_circuits(&self) -> Result<Vec<CircuitBreakerRecord>> {
        sqlx::query_as::<_, CircuitRow>(&format!(
            "SELECT {CIRCUIT_COLUMNS} FROM circuit_breakers ORDER BY level, identifier"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to list circuit breakers: {e}")))
        .and_then(|rows| rows.into_iter().map(parse_circuit).collect())
    }

    /// Breakers that are open or half-open.
    pub async fn open_circuits(&self) -> Result<Vec<CircuitBreakerRecord>> {
        sqlx::query_as::<_, CircuitRow>(&format!(
            "SELECT {CIRCUIT_COLUMNS} FROM v_open_circuits ORDER BY opened_at, id"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to list open circuits: {e}")))
        .and_then(|rows| rows.into_iter().map(parse_circuit).collect())
    }

    /// Breaker counts for one level, or across all levels when `level` is `None`.
    pub async fn circuit_health(&self, level: Option<CircuitLevel>) -> Result<HealthSummary> {
        sqlx::query_as::<_, CircuitHealthRow>(
            "SELECT COALESCE(SUM(total), 0) AS total,
                    COALESCE(SUM(open), 0) AS open,
                    COALESCE(SUM(half_open), 0) AS half_open
             FROM v_circuit_health
             WHERE ?1 IS NULL OR level = ?1",
        )
        .bind(level.map(|level| level.as_str()))
        .fetch_one(self.pool())
        .await
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to get circuit health: {e}")))
        .map(|row| {
            HealthSummary::from_counts(
                level,
                to_u64_i64(row.total),
                to_u64_i64(row.open),
                to_u64_i64(row.half_open),
            )
        })
    }

    /// Breakers with at least `min_changes` state changes since `now - window_secs`.
    pub async fn flapping_circuits(
        &self,
        window_secs: u64,
        min_changes: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<FlappingCircuit>> {
        let since = now - chrono::Duration::seconds(to_i64_u64(window_secs.min(86_400 * 365)));
        sqlx::query_as::<_, FlappingRow>(
            "SELECT circuit_id, level, identifier, state, COUNT(*) AS state_changes
             FROM v_circuit_flapping
             WHERE julianday(created_at) >= julianday(?1)
             GROUP BY circuit_id, level, identifier, state
             HAVING COUNT(*) >= ?2
             ORDER BY state_changes DESC, circuit_id",
        )
        .bind(since)
        .bind(to_i64_u64(min_changes))
        .fetch_all(self.pool())
        .await
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to detect flapping circuits: {e}")))
        .and_then(|rows| rows.into_iter().map(parse_flapping).collect())
    }

    /// Most recent events for a breaker, newest first.
    pub async fn circuit_history(
        &self,
        circuit_id: i64,
        limit: u32,
    ) -> Result<Vec<CircuitBreakerEvent>> {
        sqlx::query_as::<_, CircuitEventRow>(
            "SELECT id, circuit_id, event_type, from_state, to_state, created_at
             FROM circuit_breaker_events
             WHERE circuit_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )
        .bind(circuit_id)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(|e| SwarmError::DatabaseError(format!("Failed to get circuit history: {e}")))
        .and_then(|rows| rows.into_iter().map(parse_circuit_event).collect())
    }
}
