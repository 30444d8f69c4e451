#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Health aggregation over circuit breakers.
//!
//! Health is derived from how many breakers are open or half-open; it is never
//! stored.

use super::circuit_breaker::{CircuitLevel, CircuitState};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Classify `(total, open, half_open)` breaker counts.
    ///
    /// Half or more of the breakers open is unhealthy; any open or half-open
    /// breaker below that is degraded.
    #[must_use]
    pub const fn classify(total: u64, open: u64, half_open: u64) -> Self {
        if total == 0 {
            Self::Unknown
        } else if open.saturating_mul(2) >= total {
            Self::Unhealthy
        } else if open > 0 || half_open > 0 {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Healthy => "HEALTHY",
            Self::Degraded => "DEGRADED",
            Self::Unhealthy => "UNHEALTHY",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Breaker counts for one level, or for all levels when `level` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub level: Option<CircuitLevel>,
    pub total: u64,
    pub open: u64,
    pub half_open: u64,
    pub closed: u64,
    pub status: HealthStatus,
}

impl HealthSummary {
    #[must_use]
    pub const fn from_counts(level: Option<CircuitLevel>, total: u64, open: u64, half_open: u64) -> Self {
        Self {
            level,
            total,
            open,
            half_open,
            closed: total.saturating_sub(open).saturating_sub(half_open),
            status: HealthStatus::classify(total, open, half_open),
        }
    }
}

/// A breaker that changed state at least the configured number of times
/// within the flapping window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlappingCircuit {
    pub circuit_id: i64,
    pub level: CircuitLevel,
    pub identifier: String,
    pub state: CircuitState,
    pub state_changes: u64,
}

#[cfg(test)]
mod tests {
    use super::{HealthStatus, HealthSummary};

    #[test]
    fn classification_matches_reference_table() {
        let cases = [
            ((10, 5, 0), HealthStatus::Unhealthy),
            ((10, 4, 1), HealthStatus::Degraded),
            ((10, 0, 0), HealthStatus::Healthy),
            ((0, 0, 0), HealthStatus::Unknown),
            ((10, 0, 1), HealthStatus::Degraded),
            ((1, 1, 0), HealthStatus::Unhealthy),
            ((3, 1, 0), HealthStatus::Degraded),
        ];

        for ((total, open, half_open), expected) in cases {
            assert_eq!(
                HealthStatus::classify(total, open, half_open),
                expected,
                "({total},{open},{half_open})"
            );
        }
    }

    #[test]
    fn summary_derives_closed_count() {
        let summary = HealthSummary::from_counts(None, 10, 4, 1);
        assert_eq!(summary.closed, 5);
        assert_eq!(summary.status.as_str(), "DEGRADED");
    }
}
