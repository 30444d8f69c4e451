#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Collaborator seams.
//!
//! Everything the engine does not own (code generation, test and lint tools,
//! source control, event fan-out, static review) sits behind one of these
//! traits. Production wiring lives in [`crate::adapters`]; tests plug in fakes.

use crate::error::Result;
use crate::types::{CircuitState, Stage, Task, TaskKey, TaskStatus, WorkerId};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

pub type AgentFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<String, AgentError>> + Send + 'a>>;

/// Failures reported by the code-generation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("code agent unavailable: {0}")]
    Unavailable(String),

    #[error("code agent timed out after {0}s")]
    Timeout(u64),

    #[error("code agent failed: {0}")]
    Failed(String),
}

/// Extra inputs handed to the agent for one stage call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentContext {
    attempt: u32,
    previous_failure: Option<String>,
    review_reasons: Vec<String>,
}

impl AgentContext {
    #[must_use]
    pub fn new(attempt: u32) -> Self {
        Self {
            attempt,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_previous_failure(mut self, previous_failure: Option<String>) -> Self {
        self.previous_failure = previous_failure;
        self
    }

    #[must_use]
    pub fn with_review_reasons(mut self, reasons: Vec<String>) -> Self {
        self.review_reasons = reasons;
        self
    }

    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub fn previous_failure(&self) -> Option<&str> {
        self.previous_failure.as_deref()
    }

    #[must_use]
    pub fn review_reasons(&self) -> &[String] {
        &self.review_reasons
    }
}

pub trait CodeAgent: Send + Sync {
    fn invoke<'a>(&'a self, stage: Stage, task: &'a Task, context: &'a AgentContext)
        -> AgentFuture<'a>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolReport {
    pub passed: bool,
    pub output: String,
}

impl ToolReport {
    #[must_use]
    pub fn new(passed: bool, output: impl Into<String>) -> Self {
        Self {
            passed,
            output: output.into(),
        }
    }
}

/// One external checker: the test runner, the linter or the type-checker.
pub trait CheckTool: Send + Sync {
    fn name(&self) -> &str;

    fn run<'a>(&'a self, target: &'a str) -> PortFuture<'a, ToolReport>;
}

pub trait SourceControl: Send + Sync {
    /// Returns the branch name.
    fn create_worker_branch<'a>(
        &'a self,
        worker_id: &'a WorkerId,
        task_key: &'a TaskKey,
    ) -> PortFuture<'a, String>;

    fn commit_changes<'a>(&'a self, task_key: &'a TaskKey, message: &'a str)
        -> PortFuture<'a, ()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwarmEvent {
    CircuitStateChanged {
        breaker_name: String,
        new_state: CircuitState,
    },
    TaskClaimed {
        worker_id: WorkerId,
        task_key: TaskKey,
    },
    TaskFinished {
        worker_id: WorkerId,
        task_key: TaskKey,
        status: TaskStatus,
    },
    PhaseStarted {
        phase: i64,
    },
    PhaseFinished {
        phase: i64,
        tasks_completed: u64,
        tasks_failed: u64,
    },
}

pub trait EventBroadcaster: Send + Sync {
    fn publish(&self, event: SwarmEvent) -> PortFuture<'_, ()>;
}

/// Decides whether REFACTOR should run. An empty list means nothing to fix.
pub trait StaticReviewer: Send + Sync {
    fn review<'a>(&'a self, task: &'a Task) -> PortFuture<'a, Vec<String>>;
}

/// Import smoke check of a module's declared exports.
pub trait ExportChecker: Send + Sync {
    fn check<'a>(&'a self, impl_file: &'a str, exports: &'a [String])
        -> PortFuture<'a, ToolReport>;
}

/// Fraction of a task's acceptance criteria covered by its tests, in `[0, 1]`.
pub trait CriteriaMatcher: Send + Sync {
    fn coverage<'a>(&'a self, task: &'a Task) -> PortFuture<'a, f64>;
}

pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Monotonic time and sleeping, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration) -> SleepFuture<'_>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// A clock that only moves when told to. Sleeping advances it instantly.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset += by;
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.offset.lock().map(|offset| *offset).unwrap_or_default()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        self.advance(duration);
        Box::pin(std::future::ready(()))
    }
}
