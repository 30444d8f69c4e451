#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::identifiers::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Truncation bound for captured test output carried between GREEN attempts.
pub const MAX_TEST_OUTPUT_SIZE: usize = 8_192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Red,
    Green,
    Verify,
    Refactor,
}

impl Stage {
    pub const ALL: [Self; 4] = [Self::Red, Self::Green, Self::Verify, Self::Refactor];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Green => "green",
            Self::Verify => "verify",
            Self::Refactor => "refactor",
        }
    }

    /// Stages that call out to the code-generation agent.
    #[must_use]
    pub const fn invokes_agent(&self) -> bool {
        matches!(self, Self::Red | Self::Green | Self::Refactor)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Stage {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "red" => Ok(Self::Red),
            "green" => Ok(Self::Green),
            "verify" => Ok(Self::Verify),
            "refactor" => Ok(Self::Refactor),
            _ => Err(format!("Unknown stage: {s}")),
        }
    }
}

/// Why a stage did not succeed. Each kind is distinguishable by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    AgentUnavailable,
    BudgetExceeded,
    Timeout,
    ToolFailure,
    ContractViolation,
    AgentError,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AgentUnavailable => "agent_unavailable",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Timeout => "timeout",
            Self::ToolFailure => "tool_failure",
            Self::ContractViolation => "contract_violation",
            Self::AgentError => "agent_error",
        }
    }

    /// Failures that stop the worker instead of just the task.
    #[must_use]
    pub const fn halts_worker(&self) -> bool {
        matches!(self, Self::AgentUnavailable | Self::BudgetExceeded)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single failing tool collected during VERIFY.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyIssue {
    pub tool: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageOutcome {
    Passed {
        output: String,
    },
    Failed {
        kind: FailureKind,
        message: String,
        issues: Vec<VerifyIssue>,
    },
}

impl StageOutcome {
    #[must_use]
    pub fn passed(output: impl Into<String>) -> Self {
        Self::Passed {
            output: output.into(),
        }
    }

    #[must_use]
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
            issues: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_issues(kind: FailureKind, message: impl Into<String>, issues: Vec<VerifyIssue>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
            issues,
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }

    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Passed { .. } => None,
            Self::Failed { kind, .. } => Some(*kind),
        }
    }

    /// Text persisted with the attempt and handed to the next GREEN attempt.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Passed { output } => output.clone(),
            Self::Failed {
                kind,
                message,
                issues,
            } if issues.is_empty() => format!("[{kind}] {message}"),
            Self::Failed {
                kind,
                message,
                issues,
            } => {
                let rendered = issues
                    .iter()
                    .map(|issue| format!("--- {} ---\n{}", issue.tool, issue.output))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("[{kind}] {message}\n{rendered}")
            }
        }
    }
}

/// Keep the tail of `output` within `max_bytes`, cutting on a char boundary.
///
/// The tail carries the assertion failures, so the head is what gets dropped.
#[must_use]
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut start = output.len() - max_bytes;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    format!("...[truncated]\n{}", &output[start..])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAttempt {
    pub id: i64,
    pub task_id: TaskId,
    pub stage: Stage,
    pub attempt_number: u32,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}
