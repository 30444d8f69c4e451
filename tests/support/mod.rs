//! In-memory collaborators and a throwaway store for end-to-end runs.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarm::ports::{
    AgentContext, AgentError, AgentFuture, CheckTool, Clock, CodeAgent, EventBroadcaster,
    ManualClock, PortFuture, SourceControl, StaticReviewer, SwarmEvent, ToolReport,
};
use swarm::{
    Collaborators, NewTask, OrchestratorConfig, OrchestratorContext, Stage, SwarmDb, SwarmError,
    Task, TaskKey, WorkerId,
};
use tempfile::TempDir;

/// Test files whose implementation the fake agent has written.
#[derive(Debug, Default)]
pub struct Workspace {
    implemented: Mutex<HashSet<String>>,
}

impl Workspace {
    pub fn mark_implemented(&self, test_file: &str) {
        if let Ok(mut files) = self.implemented.lock() {
            files.insert(test_file.to_string());
        }
    }

    #[must_use]
    pub fn is_implemented(&self, test_file: &str) -> bool {
        self.implemented
            .lock()
            .map(|files| files.contains(test_file))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCall {
    pub stage: Stage,
    pub task_key: String,
    pub attempt: u32,
    pub previous_failure: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreenBehavior {
    Implement,
    /// Leave the tests failing for the first `n` GREEN calls.
    FailFirst(u32),
    Never,
}

pub struct FakeAgent {
    workspace: Arc<Workspace>,
    clock: Arc<ManualClock>,
    step: Duration,
    green: GreenBehavior,
    unavailable: bool,
    calls: Mutex<Vec<AgentCall>>,
}

impl FakeAgent {
    #[must_use]
    pub fn calls(&self) -> Vec<AgentCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn calls_for(&self, stage: Stage) -> Vec<AgentCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.stage == stage)
            .collect()
    }

    fn green_calls_so_far(&self) -> u32 {
        u32::try_from(self.calls_for(Stage::Green).len()).unwrap_or(u32::MAX)
    }
}

impl CodeAgent for FakeAgent {
    fn invoke<'a>(
        &'a self,
        stage: Stage,
        task: &'a Task,
        context: &'a AgentContext,
    ) -> AgentFuture<'a> {
        Box::pin(async move {
            if self.unavailable {
                return Err(AgentError::Unavailable("agent binary missing".to_string()));
            }
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(AgentCall {
                    stage,
                    task_key: task.task_key.value().to_string(),
                    attempt: context.attempt(),
                    previous_failure: context.previous_failure().map(str::to_string),
                });
            }
            self.clock.advance(self.step);

            if stage == Stage::Green {
                let implement = match self.green {
                    GreenBehavior::Implement => true,
                    GreenBehavior::FailFirst(n) => self.green_calls_so_far() > n,
                    GreenBehavior::Never => false,
                };
                if implement {
                    self.workspace.mark_implemented(&task.test_file);
                }
            }
            Ok(format!("{stage} done for {}", task.task_key))
        })
    }
}

/// Test runner: a test file passes once its implementation exists.
pub struct WorkspaceTests {
    workspace: Arc<Workspace>,
    always_pass: bool,
}

impl CheckTool for WorkspaceTests {
    fn name(&self) -> &str {
        "tests"
    }

    fn run<'a>(&'a self, target: &'a str) -> PortFuture<'a, ToolReport> {
        Box::pin(async move {
            Ok(if self.always_pass || self.workspace.is_implemented(target) {
                ToolReport::new(true, format!("{target}: 3 passed"))
            } else {
                ToolReport::new(false, format!("{target}: 3 failed, ImportError"))
            })
        })
    }
}

/// Lint or type checker that fails its first `fail_first` calls.
pub struct CountingTool {
    name: &'static str,
    fail_first: u32,
    calls: Mutex<u32>,
}

impl CountingTool {
    #[must_use]
    pub const fn new(name: &'static str, fail_first: u32) -> Self {
        Self {
            name,
            fail_first,
            calls: Mutex::new(0),
        }
    }
}

impl CheckTool for CountingTool {
    fn name(&self) -> &str {
        self.name
    }

    fn run<'a>(&'a self, target: &'a str) -> PortFuture<'a, ToolReport> {
        Box::pin(async move {
            let call = self
                .calls
                .lock()
                .map(|mut calls| {
                    *calls += 1;
                    *calls
                })
                .unwrap_or(u32::MAX);
            Ok(if call <= self.fail_first {
                ToolReport::new(false, format!("{}: E501 line too long in {target}", self.name))
            } else {
                ToolReport::new(true, "clean")
            })
        })
    }
}

/// Branch creation that can be made to fail every time.
#[derive(Default)]
pub struct FakeSourceControl {
    fail_branches: bool,
    branch_attempts: Mutex<u32>,
}

impl FakeSourceControl {
    #[must_use]
    pub fn branch_attempts(&self) -> u32 {
        self.branch_attempts.lock().map(|n| *n).unwrap_or(0)
    }
}

impl SourceControl for FakeSourceControl {
    fn create_worker_branch<'a>(
        &'a self,
        worker_id: &'a WorkerId,
        task_key: &'a TaskKey,
    ) -> PortFuture<'a, String> {
        if let Ok(mut attempts) = self.branch_attempts.lock() {
            *attempts += 1;
        }
        Box::pin(async move {
            if self.fail_branches {
                return Err(SwarmError::IoError(std::io::Error::other(
                    "fatal: not a git repository",
                )));
            }
            Ok(format!("swarm/{worker_id}/{task_key}"))
        })
    }

    fn commit_changes<'a>(&'a self, _task_key: &'a TaskKey, _message: &'a str) -> PortFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}

pub struct FakeReviewer {
    reasons: Vec<String>,
}

impl StaticReviewer for FakeReviewer {
    fn review<'a>(&'a self, _task: &'a Task) -> PortFuture<'a, Vec<String>> {
        Box::pin(async move { Ok(self.reasons.clone()) })
    }
}

#[derive(Default)]
pub struct RecordingBroadcaster {
    events: Mutex<Vec<SwarmEvent>>,
}

impl RecordingBroadcaster {
    #[must_use]
    pub fn events(&self) -> Vec<SwarmEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl EventBroadcaster for RecordingBroadcaster {
    fn publish(&self, event: SwarmEvent) -> PortFuture<'_, ()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        Box::pin(async { Ok(()) })
    }
}

/// Knobs for one scenario.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub settings: Vec<(&'static str, String)>,
    pub green: GreenBehavior,
    pub agent_step: Duration,
    pub agent_unavailable: bool,
    pub tests_always_pass: bool,
    pub lint_fail_first: u32,
    pub review_reasons: Vec<String>,
    pub branch_creation_fails: bool,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            settings: vec![("max_workers", "1".to_string())],
            green: GreenBehavior::Implement,
            agent_step: Duration::ZERO,
            agent_unavailable: false,
            tests_always_pass: false,
            lint_fail_first: 0,
            review_reasons: Vec::new(),
            branch_creation_fails: false,
        }
    }
}

impl Scenario {
    #[must_use]
    pub fn with(mut self, key: &'static str, value: impl ToString) -> Self {
        self.settings.retain(|(existing, _)| *existing != key);
        self.settings.push((key, value.to_string()));
        self
    }
}

pub struct Harness {
    pub ctx: OrchestratorContext,
    pub agent: Arc<FakeAgent>,
    pub clock: Arc<ManualClock>,
    pub workspace: Arc<Workspace>,
    pub events: Arc<RecordingBroadcaster>,
    pub source_control: Arc<FakeSourceControl>,
    _dir: TempDir,
}

impl Harness {
    pub async fn new(scenario: Scenario) -> Self {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir failed: {e}"));
        let url = format!("sqlite://{}", dir.path().join("swarm.db").display());
        let db = SwarmDb::new(&url)
            .await
            .unwrap_or_else(|e| unreachable!("db open failed: {e}"));

        let settings = scenario.settings.clone();
        let config = OrchestratorConfig::from_lookup(|key| {
            settings
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.clone())
        });

        let workspace = Arc::new(Workspace::default());
        let clock = Arc::new(ManualClock::new());
        let agent = Arc::new(FakeAgent {
            workspace: Arc::clone(&workspace),
            clock: Arc::clone(&clock),
            step: scenario.agent_step,
            green: scenario.green,
            unavailable: scenario.agent_unavailable,
            calls: Mutex::new(Vec::new()),
        });
        let events = Arc::new(RecordingBroadcaster::default());
        let source_control = Arc::new(FakeSourceControl {
            fail_branches: scenario.branch_creation_fails,
            ..FakeSourceControl::default()
        });
        let collaborators = Collaborators {
            agent: Arc::clone(&agent) as Arc<dyn CodeAgent>,
            tests: Arc::new(WorkspaceTests {
                workspace: Arc::clone(&workspace),
                always_pass: scenario.tests_always_pass,
            }),
            lint: Arc::new(CountingTool::new("lint", scenario.lint_fail_first)),
            typecheck: Arc::new(CountingTool::new("typecheck", 0)),
            source_control: Arc::clone(&source_control) as Arc<dyn SourceControl>,
            reviewer: Arc::new(FakeReviewer {
                reasons: scenario.review_reasons.clone(),
            }),
            broadcaster: Arc::clone(&events) as Arc<dyn EventBroadcaster>,
            clock: Arc::clone(&clock) as Arc<dyn Clock>,
        };

        let ctx = OrchestratorContext::with_parts(config, db, collaborators);
        ctx.initialize()
            .await
            .unwrap_or_else(|e| unreachable!("schema init failed: {e}"));

        Self {
            ctx,
            agent,
            clock,
            workspace,
            events,
            source_control,
            _dir: dir,
        }
    }

    pub async fn seed(&self, task: NewTask) {
        let key = task.task_key.clone();
        self.ctx
            .db()
            .insert_task(&task)
            .await
            .unwrap_or_else(|e| unreachable!("insert {key} failed: {e}"));
    }

    pub async fn task(&self, key: &str) -> Task {
        self.ctx
            .db()
            .get_task_by_key(&TaskKey::new(key))
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| unreachable!("task {key} missing"))
    }
}
