#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Failure containment per task, stage, worker, pipeline and system.
//!
//! Breaker rows are written through a version-checked update so concurrent
//! workers never lose each other's counts; every write appends to the event
//! log, which is where flapping and history come from.

use crate::db::{CircuitTransition, SwarmDb};
use crate::error::{Result, SwarmError};
use crate::ports::{EventBroadcaster, SwarmEvent};
use crate::types::{
    CircuitBreakerEvent, CircuitBreakerRecord, CircuitConfig, CircuitEventType, CircuitLevel,
    CircuitState, FlappingCircuit, HealthSummary,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_CAS_RETRIES: u32 = 8;

#[derive(Clone)]
pub struct CircuitBreakerService {
    db: SwarmDb,
    config: CircuitConfig,
    broadcaster: Option<Arc<dyn EventBroadcaster>>,
}

impl CircuitBreakerService {
    #[must_use]
    pub const fn new(db: SwarmDb, config: CircuitConfig) -> Self {
        Self {
            db,
            config,
            broadcaster: None,
        }
    }

    #[must_use]
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn EventBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// # Errors
    /// Returns an error if the store fails or the write keeps losing races.
    pub async fn record_failure(
        &self,
        level: CircuitLevel,
        identifier: &str,
    ) -> Result<CircuitBreakerRecord> {
        let config = self.config;
        self.mutate(
            level,
            identifier,
            Some(CircuitEventType::FailureRecorded),
            move |record, now| record.try_half_open(&config, now).record_failure(&config, now),
        )
        .await
    }

    /// # Errors
    /// Returns an error if the store fails or the write keeps losing races.
    pub async fn record_success(
        &self,
        level: CircuitLevel,
        identifier: &str,
    ) -> Result<CircuitBreakerRecord> {
        let config = self.config;
        self.mutate(
            level,
            identifier,
            Some(CircuitEventType::SuccessRecorded),
            move |record, now| record.try_half_open(&config, now).record_success(&config, now),
        )
        .await
    }

    /// Force a breaker closed and clear its counters.
    ///
    /// # Errors
    /// Returns an error if the store fails or the write keeps losing races.
    pub async fn reset(&self, level: CircuitLevel, identifier: &str) -> Result<CircuitBreakerRecord> {
        self.mutate(
            level,
            identifier,
            Some(CircuitEventType::ManualReset),
            |record, _now| record.reset(),
        )
        .await
    }

    /// Current state, moving an open breaker to half-open once its reset
    /// timeout has elapsed. Unknown breakers are closed.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn state(&self, level: CircuitLevel, identifier: &str) -> Result<CircuitState> {
        let Some(current) = self.db.get_circuit(level, identifier).await? else {
            return Ok(CircuitState::Closed);
        };
        if current.state != CircuitState::Open {
            return Ok(current.state);
        }

        let config = self.config;
        self.mutate(level, identifier, None, move |record, now| {
            record.try_half_open(&config, now)
        })
        .await
        .map(|record| record.state)
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn allows(&self, level: CircuitLevel, identifier: &str) -> Result<bool> {
        self.state(level, identifier)
            .await
            .map(|state| state.allows_operations())
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn health(&self, level: Option<CircuitLevel>) -> Result<HealthSummary> {
        self.db.circuit_health(level).await
    }

    /// Breakers with `min_changes` or more state changes inside the configured window.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn flapping(&self, min_changes: u64) -> Result<Vec<FlappingCircuit>> {
        self.db
            .flapping_circuits(self.config.window_secs, min_changes, Utc::now())
            .await
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn history(
        &self,
        level: CircuitLevel,
        identifier: &str,
        limit: u32,
    ) -> Result<Vec<CircuitBreakerEvent>> {
        match self.db.get_circuit(level, identifier).await? {
            Some(record) => self.db.circuit_history(record.id, limit).await,
            None => Ok(Vec::new()),
        }
    }

    async fn mutate<F>(
        &self,
        level: CircuitLevel,
        identifier: &str,
        event: Option<CircuitEventType>,
        apply: F,
    ) -> Result<CircuitBreakerRecord>
    where
        F: Fn(CircuitBreakerRecord, DateTime<Utc>) -> CircuitBreakerRecord + Send,
    {
        for attempt in 1..=MAX_CAS_RETRIES {
            let current = self.db.ensure_circuit(level, identifier).await?;
            let now = Utc::now();
            let next = apply(current.clone(), now);
            if next == current {
                return Ok(current);
            }

            let transition = CircuitTransition::new(&current, next, event, now);
            if self.db.apply_circuit_transition(&transition).await?.applied() {
                if transition.changes_state() {
                    info!(
                        breaker = %transition.next.name(),
                        from = %current.state,
                        to = %transition.next.state,
                        "Circuit breaker changed state"
                    );
                    self.broadcast(&transition.next);
                }
                return Ok(transition.next);
            }
            debug!(breaker = %current.name(), attempt, "Circuit breaker write lost a race; retrying");
        }

        Err(SwarmError::CircuitError(format!(
            "Circuit breaker {level}:{identifier} kept changing underneath {MAX_CAS_RETRIES} writes"
        )))
    }

    fn broadcast(&self, record: &CircuitBreakerRecord) {
        let Some(broadcaster) = self.broadcaster.clone() else {
            return;
        };
        let breaker_name = record.name();
        let event = SwarmEvent::CircuitStateChanged {
            breaker_name: breaker_name.clone(),
            new_state: record.state,
        };
        tokio::spawn(async move {
            if let Err(e) = broadcaster.publish(event).await {
                warn!(breaker = %breaker_name, error = %e, "Failed to broadcast circuit state change");
            }
        });
    }
}
