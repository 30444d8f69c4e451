#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitLevel {
    Task,
    Stage,
    Worker,
    Pipeline,
    System,
}

impl CircuitLevel {
    pub const ALL: [Self; 5] = [
        Self::Task,
        Self::Stage,
        Self::Worker,
        Self::Pipeline,
        Self::System,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Stage => "stage",
            Self::Worker => "worker",
            Self::Pipeline => "pipeline",
            Self::System => "system",
        }
    }
}

impl fmt::Display for CircuitLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for CircuitLevel {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, String> {
        match value {
            "task" => Ok(Self::Task),
            "stage" => Ok(Self::Stage),
            "worker" => Ok(Self::Worker),
            "pipeline" => Ok(Self::Pipeline),
            "system" => Ok(Self::System),
            _ => Err(format!("Unknown circuit level: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub const fn allows_operations(&self) -> bool {
        matches!(self, Self::Closed | Self::HalfOpen)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for CircuitState {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, String> {
        match value {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "half_open" | "half-open" => Ok(Self::HalfOpen),
            _ => Err(format!("Unknown circuit state: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout_secs: u64,
    /// Window used by flapping detection.
    pub window_secs: u64,
}

impl CircuitConfig {
    #[must_use]
    pub const fn new(
        failure_threshold: u32,
        success_threshold: u32,
        reset_timeout_secs: u64,
        window_secs: u64,
    ) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            reset_timeout_secs,
            window_secs,
        }
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self::new(5, 3, 60, 300)
    }
}

/// Current-state row of one breaker. History lives in the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerRecord {
    pub id: i64,
    pub level: CircuitLevel,
    pub identifier: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl CircuitBreakerRecord {
    #[must_use]
    pub fn new(level: CircuitLevel, identifier: impl Into<String>) -> Self {
        Self {
            id: 0,
            level,
            identifier: identifier.into(),
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            last_failure_at: None,
            last_success_at: None,
            version: 0,
        }
    }

    /// Name used in broadcasts: `<level>:<identifier>`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}:{}", self.level, self.identifier)
    }

    #[must_use]
    pub const fn should_open(&self, config: &CircuitConfig) -> bool {
        matches!(self.state, CircuitState::Closed) && self.failure_count >= config.failure_threshold
    }

    #[must_use]
    pub const fn should_close(&self, config: &CircuitConfig) -> bool {
        matches!(self.state, CircuitState::HalfOpen)
            && self.success_count >= config.success_threshold
    }

    #[must_use]
    pub fn record_failure(mut self, config: &CircuitConfig, now: DateTime<Utc>) -> Self {
        self.failure_count = self.failure_count.saturating_add(1);
        self.success_count = 0;
        self.last_failure_at = Some(now);
        self.version += 1;

        if self.should_open(config) || self.state == CircuitState::HalfOpen {
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
        }

        self
    }

    #[must_use]
    pub fn record_success(mut self, config: &CircuitConfig, now: DateTime<Utc>) -> Self {
        self.success_count = self.success_count.saturating_add(1);
        self.last_success_at = Some(now);
        self.version += 1;

        match self.state {
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::HalfOpen if self.should_close(config) => {
                self.state = CircuitState::Closed;
                self.failure_count = 0;
                self.opened_at = None;
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }

        self
    }

    /// Move an open breaker to half-open once `reset_timeout_secs` has elapsed.
    #[must_use]
    pub fn try_half_open(mut self, config: &CircuitConfig, now: DateTime<Utc>) -> Self {
        if self.state == CircuitState::Open {
            if let Some(opened_at) = self.opened_at {
                let elapsed = u64::try_from((now - opened_at).num_seconds()).unwrap_or(0);
                if elapsed >= config.reset_timeout_secs {
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    self.version += 1;
                }
            }
        }
        self
    }

    #[must_use]
    pub fn reset(mut self) -> Self {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.opened_at = None;
        self.version += 1;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitEventType {
    StateChange,
    FailureRecorded,
    SuccessRecorded,
    ManualReset,
}

impl CircuitEventType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StateChange => "state_change",
            Self::FailureRecorded => "failure_recorded",
            Self::SuccessRecorded => "success_recorded",
            Self::ManualReset => "manual_reset",
        }
    }
}

impl TryFrom<&str> for CircuitEventType {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, String> {
        match value {
            "state_change" => Ok(Self::StateChange),
            "failure_recorded" => Ok(Self::FailureRecorded),
            "success_recorded" => Ok(Self::SuccessRecorded),
            "manual_reset" => Ok(Self::ManualReset),
            _ => Err(format!("Unknown circuit event type: {value}")),
        }
    }
}

/// Immutable entry of the circuit event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerEvent {
    pub id: i64,
    pub circuit_id: i64,
    pub event_type: CircuitEventType,
    pub from_state: CircuitState,
    pub to_state: CircuitState,
    pub created_at: DateTime<Utc>,
}
