#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::identifiers::{TaskId, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of a conditional write: the precondition held and the row changed,
/// or it did not and nothing was written.
///
/// Built only from the affected-row count of the write itself, never from a
/// prior read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    Rejected,
}

impl CasOutcome {
    #[must_use]
    pub const fn from_rows_affected(rows: u64) -> Self {
        if rows == 1 {
            Self::Applied
        } else {
            Self::Rejected
        }
    }

    #[must_use]
    pub const fn applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimOutcome {
    Completed,
    Failed,
    Timeout,
    Released,
}

impl ClaimOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Released => "released",
        }
    }
}

impl TryFrom<&str> for ClaimOutcome {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            "released" => Ok(Self::Released),
            _ => Err(format!("Unknown claim outcome: {s}")),
        }
    }
}

/// One audit row per claim cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub id: i64,
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub claimed_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub outcome: Option<ClaimOutcome>,
}

impl ClaimRecord {
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.released_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cas_outcome_is_applied_only_for_exactly_one_row() {
        assert!(CasOutcome::from_rows_affected(1).applied());
        assert!(!CasOutcome::from_rows_affected(0).applied());
        assert!(!CasOutcome::from_rows_affected(2).applied());
    }

    #[test]
    fn claim_outcome_roundtrip_preserves_values() {
        let cases = [
            (ClaimOutcome::Completed, "completed"),
            (ClaimOutcome::Failed, "failed"),
            (ClaimOutcome::Timeout, "timeout"),
            (ClaimOutcome::Released, "released"),
        ];

        for (outcome, expected) in cases {
            assert_eq!(outcome.as_str(), expected);
            assert_eq!(ClaimOutcome::try_from(expected), Ok(outcome));
        }
    }

    #[test]
    fn claim_outcome_rejects_invalid_values() {
        for value in ["", "COMPLETED", "complete", "released "] {
            assert!(ClaimOutcome::try_from(value).is_err());
        }
    }
}
