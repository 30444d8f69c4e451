#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::identifiers::{TaskId, TaskKey, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Passing,
    Complete,
    Blocked,
}

impl TaskStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Passing => "passing",
            Self::Complete => "complete",
            Self::Blocked => "blocked",
        }
    }

    /// Whether a dependent task may treat this one as done.
    #[must_use]
    pub const fn satisfies_dependency(&self) -> bool {
        matches!(self, Self::Passing | Self::Complete)
    }

    /// Pending or blocked at run end means the run left work behind.
    #[must_use]
    pub const fn is_orphaned(&self) -> bool {
        matches!(self, Self::Pending | Self::Blocked)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "passing" => Ok(Self::Passing),
            "complete" => Ok(Self::Complete),
            "blocked" => Ok(Self::Blocked),
            _ => Err(format!("Unknown task status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_key: TaskKey,
    pub title: String,
    pub goal: String,
    pub test_file: String,
    pub impl_file: String,
    pub status: TaskStatus,
    pub phase: i64,
    pub sequence: i64,
    pub depends_on: Vec<TaskKey>,
    pub claimed_by: Option<WorkerId>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub acceptance_criteria: Vec<String>,
    pub module_exports: Vec<String>,
}

impl Task {
    /// A claim is active only while its holder is set and the lease has not lapsed.
    #[must_use]
    pub fn has_active_claim(&self, now: DateTime<Utc>) -> bool {
        self.claimed_by.is_some() && self.claim_expires_at.is_some_and(|expires| expires > now)
    }

    /// Claimed, still in progress, but past its lease.
    #[must_use]
    pub fn has_stale_claim(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::InProgress
            && self.claimed_by.is_some()
            && self.claim_expires_at.is_some_and(|expires| expires < now)
    }
}

/// Insert payload for a task; everything claim-related starts empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub task_key: TaskKey,
    pub title: String,
    pub goal: String,
    pub test_file: String,
    pub impl_file: String,
    pub phase: i64,
    pub sequence: i64,
    pub depends_on: Vec<TaskKey>,
    pub acceptance_criteria: Vec<String>,
    pub module_exports: Vec<String>,
}

impl NewTask {
    #[must_use]
    pub fn new(task_key: impl Into<String>, phase: i64, sequence: i64) -> Self {
        let task_key = TaskKey::new(task_key);
        Self {
            title: task_key.value().to_string(),
            goal: String::new(),
            test_file: format!("tests/test_{}.py", task_key.value()),
            impl_file: format!("src/{}.py", task_key.value()),
            task_key,
            phase,
            sequence,
            depends_on: Vec::new(),
            acceptance_criteria: Vec::new(),
            module_exports: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    #[must_use]
    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    #[must_use]
    pub fn with_files(mut self, test_file: impl Into<String>, impl_file: impl Into<String>) -> Self {
        self.test_file = test_file.into();
        self.impl_file = impl_file.into();
        self
    }

    #[must_use]
    pub fn depends_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = keys.into_iter().map(TaskKey::new).collect();
        self
    }

    #[must_use]
    pub fn with_acceptance_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acceptance_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_module_exports<I, S>(mut self, exports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.module_exports = exports.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task(status: TaskStatus, claimed_by: Option<&str>, expires_in_secs: Option<i64>) -> Task {
        let now = Utc::now();
        Task {
            id: TaskId::new(1),
            task_key: TaskKey::new("t1"),
            title: "t1".to_string(),
            goal: String::new(),
            test_file: "tests/test_t1.py".to_string(),
            impl_file: "src/t1.py".to_string(),
            status,
            phase: 0,
            sequence: 0,
            depends_on: Vec::new(),
            claimed_by: claimed_by.map(WorkerId::new),
            claimed_at: claimed_by.map(|_| now),
            claim_expires_at: expires_in_secs.map(|secs| now + Duration::seconds(secs)),
            retry_count: 0,
            acceptance_criteria: Vec::new(),
            module_exports: Vec::new(),
        }
    }

    #[test]
    fn task_status_roundtrip_preserves_values() {
        let cases = [
            (TaskStatus::Pending, "pending"),
            (TaskStatus::InProgress, "in_progress"),
            (TaskStatus::Passing, "passing"),
            (TaskStatus::Complete, "complete"),
            (TaskStatus::Blocked, "blocked"),
        ];

        for (status, expected) in cases {
            assert_eq!(status.as_str(), expected);
            assert_eq!(TaskStatus::try_from(expected), Ok(status));
        }
        assert!(TaskStatus::try_from("done").is_err());
    }

    #[test]
    fn only_passing_and_complete_satisfy_dependencies() {
        assert!(TaskStatus::Complete.satisfies_dependency());
        assert!(TaskStatus::Passing.satisfies_dependency());
        assert!(!TaskStatus::Pending.satisfies_dependency());
        assert!(!TaskStatus::InProgress.satisfies_dependency());
        assert!(!TaskStatus::Blocked.satisfies_dependency());
    }

    #[test]
    fn active_claim_requires_holder_and_future_expiry() {
        let now = Utc::now();
        assert!(task(TaskStatus::InProgress, Some("w1"), Some(60)).has_active_claim(now));
        assert!(!task(TaskStatus::InProgress, Some("w1"), Some(-60)).has_active_claim(now));
        assert!(!task(TaskStatus::Pending, None, None).has_active_claim(now));
    }

    #[test]
    fn stale_claim_is_expired_in_progress_claim() {
        let now = Utc::now();
        assert!(task(TaskStatus::InProgress, Some("w1"), Some(-5)).has_stale_claim(now));
        assert!(!task(TaskStatus::Complete, Some("w1"), Some(-5)).has_stale_claim(now));
        assert!(!task(TaskStatus::InProgress, Some("w1"), Some(5)).has_stale_claim(now));
    }

    #[test]
    fn new_task_builder_sets_dependencies_in_order() {
        let task = NewTask::new("c", 1, 2).depends_on(["b", "a"]);
        assert_eq!(task.depends_on, vec![TaskKey::new("b"), TaskKey::new("a")]);
        assert_eq!(task.test_file, "tests/test_c.py");
    }
}
