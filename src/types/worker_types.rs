#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::identifiers::{TaskId, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerStatus {
    Active,
    Idle,
    Dead,
}

impl WorkerStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for WorkerStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "active" => Ok(Self::Active),
            "idle" => Ok(Self::Idle),
            "dead" => Ok(Self::Dead),
            _ => Err(format!("Unknown worker status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub worker_id: WorkerId,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub current_task_id: Option<TaskId>,
}

/// Where a worker is inside the per-task pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Idle,
    Claimed,
    Red,
    Green(u32),
    Verify,
    Refactor,
    Complete,
    Blocked,
}

impl WorkerState {
    /// Any state may fall back to `Idle`: that is the release path.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match (*self, next) {
            (_, Self::Idle)
            | (Self::Idle, Self::Claimed)
            | (Self::Claimed, Self::Red)
            | (Self::Red | Self::Verify, Self::Green(1..))
            | (Self::Green(_), Self::Verify)
            | (Self::Verify, Self::Refactor | Self::Complete)
            | (Self::Refactor, Self::Complete)
            | (Self::Claimed | Self::Red | Self::Green(_) | Self::Verify, Self::Blocked) => true,
            (Self::Green(current), Self::Green(attempt)) => attempt == current.saturating_add(1),
            _ => false,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Blocked)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Claimed => write!(f, "claimed"),
            Self::Red => write!(f, "red"),
            Self::Green(attempt) => write!(f, "green#{attempt}"),
            Self::Verify => write!(f, "verify"),
            Self::Refactor => write!(f, "refactor"),
            Self::Complete => write!(f, "complete"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}
