#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Default collaborator implementations: shell commands for the agent, the
//! check tools and the criteria matcher, a tracing sink for events, and no-op
//! source control and review.

use crate::error::{Result, SwarmError};
use crate::ports::{
    AgentContext, AgentError, AgentFuture, CheckTool, CodeAgent, CriteriaMatcher, EventBroadcaster,
    ExportChecker, PortFuture, SourceControl, StaticReviewer, SwarmEvent, ToolReport,
};
use crate::types::{Stage, Task, TaskKey, WorkerId};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info};

pub const MAX_OUTPUT_CAPTURE_BYTES: usize = 1_048_576;

/// Exit status shells use when the command itself is missing.
const COMMAND_NOT_FOUND: i32 = 127;

#[derive(Debug, Clone)]
pub struct StreamCapture {
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

/// Read `stream` to the end, keeping at most `max_bytes`.
///
/// # Errors
/// Returns an error if the stream cannot be read.
pub async fn capture_stream_limited<R>(mut stream: R, max_bytes: usize) -> Result<StreamCapture>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = Vec::new();
    let mut truncated = false;
    let mut chunk = [0_u8; 8_192];

    loop {
        let read = stream.read(&mut chunk).await.map_err(SwarmError::IoError)?;
        if read == 0 {
            break;
        }

        let remaining = max_bytes.saturating_sub(bytes.len());
        if remaining == 0 {
            truncated = true;
            continue;
        }

        let to_copy = remaining.min(read);
        bytes.extend_from_slice(&chunk[..to_copy]);
        if to_copy < read {
            truncated = true;
        }
    }

    Ok(StreamCapture { bytes, truncated })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    /// Stdout and stderr joined, for tool reports.
    #[must_use]
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("failed to start command: {0}")]
    Spawn(std::io::Error),

    #[error("command timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error(transparent)]
    Io(SwarmError),
}

/// Run `command` through `sh -c` with bounded output capture and a timeout.
///
/// # Errors
/// Returns an error if the command cannot start, times out, or its output
/// cannot be read.
pub async fn run_shell(
    command: &str,
    envs: &[(&str, String)],
    timeout: Duration,
) -> std::result::Result<ShellOutput, ShellError> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .envs(envs.iter().map(|(key, value)| (*key, value.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(ShellError::Spawn)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ShellError::Io(SwarmError::Internal("stdout not captured".to_string())))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ShellError::Io(SwarmError::Internal("stderr not captured".to_string())))?;

    let stdout_task =
        tokio::spawn(async move { capture_stream_limited(stdout, MAX_OUTPUT_CAPTURE_BYTES).await });
    let stderr_task =
        tokio::spawn(async move { capture_stream_limited(stderr, MAX_OUTPUT_CAPTURE_BYTES).await });

    let status = if let Ok(waited) = tokio::time::timeout(timeout, child.wait()).await {
        waited.map_err(|e| ShellError::Io(SwarmError::IoError(e)))?
    } else {
        let _ = child.kill().await;
        return Err(ShellError::TimedOut(timeout));
    };

    let stdout = join_capture(stdout_task).await?;
    let stderr = join_capture(stderr_task).await?;

    Ok(ShellOutput {
        exit_code: status.code(),
        stdout: render(&stdout),
        stderr: render(&stderr),
    })
}

async fn join_capture(
    task: tokio::task::JoinHandle<Result<StreamCapture>>,
) -> std::result::Result<StreamCapture, ShellError> {
    task.await
        .map_err(|e| ShellError::Io(SwarmError::Internal(format!("capture task failed: {e}"))))?
        .map_err(ShellError::Io)
}

fn render(capture: &StreamCapture) -> String {
    let text = String::from_utf8_lossy(&capture.bytes).into_owned();
    if capture.truncated {
        format!("{text}\n...[output truncated]")
    } else {
        text
    }
}

/// Wrap `value` in single quotes so `sh` reads it as one literal word.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Replace every `{target}` in `template` with the quoted target.
#[must_use]
pub fn substitute_target(template: &str, target: &str) -> String {
    template.replace("{target}", &shell_quote(target))
}

/// Test runner, linter or type-checker behind a shell command template.
/// Exit status 0 means the check passed.
#[derive(Debug, Clone)]
pub struct ShellCheckTool {
    name: String,
    template: String,
    timeout: Duration,
}

impl ShellCheckTool {
    #[must_use]
    pub fn new(name: impl Into<String>, template: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            timeout,
        }
    }
}

impl CheckTool for ShellCheckTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, target: &'a str) -> PortFuture<'a, ToolReport> {
        Box::pin(async move {
            let command = substitute_target(&self.template, target);
            debug!(tool = %self.name, command = %command, "Running check");
            match run_shell(&command, &[], self.timeout).await {
                Ok(output) => Ok(ToolReport::new(output.success(), output.combined())),
                Err(ShellError::TimedOut(limit)) => Ok(ToolReport::new(
                    false,
                    format!("{} timed out after {}s", self.name, limit.as_secs()),
                )),
                Err(ShellError::Spawn(e)) => Err(SwarmError::IoError(e)),
                Err(ShellError::Io(e)) => Err(e),
            }
        })
    }
}

/// Code-generation agent behind a shell command.
///
/// Stage inputs travel as `SWARM_*` environment variables; stdout is the
/// agent's answer. No command, or a command the shell cannot find, means the
/// agent is unavailable.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Option<String>,
    timeout: Duration,
}

impl CommandAgent {
    #[must_use]
    pub const fn new(command: Option<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

fn agent_env(stage: Stage, task: &Task, context: &AgentContext) -> Vec<(&'static str, String)> {
    vec![
        ("SWARM_STAGE", stage.as_str().to_string()),
        ("SWARM_TASK_KEY", task.task_key.value().to_string()),
        ("SWARM_TASK_TITLE", task.title.clone()),
        ("SWARM_TASK_GOAL", task.goal.clone()),
        ("SWARM_TEST_FILE", task.test_file.clone()),
        ("SWARM_IMPL_FILE", task.impl_file.clone()),
        ("SWARM_ATTEMPT", context.attempt().to_string()),
        (
            "SWARM_PREVIOUS_FAILURE",
            context.previous_failure().unwrap_or_default().to_string(),
        ),
        ("SWARM_REVIEW_REASONS", context.review_reasons().join("\n")),
    ]
}

impl CodeAgent for CommandAgent {
    fn invoke<'a>(
        &'a self,
        stage: Stage,
        task: &'a Task,
        context: &'a AgentContext,
    ) -> AgentFuture<'a> {
        Box::pin(async move {
            let Some(command) = self.command.as_deref() else {
                return Err(AgentError::Unavailable("no agent command configured".to_string()));
            };
            let envs = agent_env(stage, task, context);
            match run_shell(command, &envs, self.timeout).await {
                Ok(output) if output.success() => Ok(output.stdout),
                Ok(output) if output.exit_code == Some(COMMAND_NOT_FOUND) => {
                    Err(AgentError::Unavailable(output.stderr.trim().to_string()))
                }
                Ok(output) => Err(AgentError::Failed(format!(
                    "exit {}: {}",
                    output.exit_code.map_or_else(|| "signal".to_string(), |code| code.to_string()),
                    output.stderr.trim()
                ))),
                Err(ShellError::Spawn(e)) => Err(AgentError::Unavailable(e.to_string())),
                Err(ShellError::TimedOut(limit)) => Err(AgentError::Timeout(limit.as_secs())),
                Err(ShellError::Io(e)) => Err(AgentError::Failed(e.to_string())),
            }
        })
    }
}

/// Import smoke check through a shell template with `{target}` and
/// `{exports}` (comma separated) placeholders.
#[derive(Debug, Clone)]
pub struct ShellExportChecker {
    template: String,
    timeout: Duration,
}

impl ShellExportChecker {
    #[must_use]
    pub fn new(template: impl Into<String>, timeout: Duration) -> Self {
        Self {
            template: template.into(),
            timeout,
        }
    }
}

impl ExportChecker for ShellExportChecker {
    fn check<'a>(
        &'a self,
        impl_file: &'a str,
        exports: &'a [String],
    ) -> PortFuture<'a, ToolReport> {
        Box::pin(async move {
            let command = substitute_target(&self.template, impl_file)
                .replace("{exports}", &shell_quote(&exports.join(",")));
            match run_shell(&command, &[], self.timeout).await {
                Ok(output) => Ok(ToolReport::new(output.success(), output.combined())),
                Err(ShellError::TimedOut(limit)) => Ok(ToolReport::new(
                    false,
                    format!("export check timed out after {}s", limit.as_secs()),
                )),
                Err(ShellError::Spawn(e)) => Err(SwarmError::IoError(e)),
                Err(ShellError::Io(e)) => Err(e),
            }
        })
    }
}

/// Acceptance-criteria coverage from a shell template with a `{target}`
/// placeholder for the test file. The criteria arrive one per line in
/// `SWARM_ACCEPTANCE_CRITERIA`; stdout must be a number in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ShellCriteriaMatcher {
    template: String,
    timeout: Duration,
}

impl ShellCriteriaMatcher {
    #[must_use]
    pub fn new(template: impl Into<String>, timeout: Duration) -> Self {
        Self {
            template: template.into(),
            timeout,
        }
    }
}

fn parse_coverage(stdout: &str) -> Result<f64> {
    let score = stdout
        .trim()
        .parse::<f64>()
        .map_err(|e| SwarmError::StageError(format!("criteria command printed {:?}: {e}", stdout.trim())))?;
    if score.is_finite() {
        Ok(score.clamp(0.0, 1.0))
    } else {
        Err(SwarmError::StageError(format!("criteria command printed {score}")))
    }
}

impl CriteriaMatcher for ShellCriteriaMatcher {
    fn coverage<'a>(&'a self, task: &'a Task) -> PortFuture<'a, f64> {
        Box::pin(async move {
            let command = substitute_target(&self.template, &task.test_file);
            let envs = [
                ("SWARM_TASK_KEY", task.task_key.value().to_string()),
                ("SWARM_IMPL_FILE", task.impl_file.clone()),
                ("SWARM_ACCEPTANCE_CRITERIA", task.acceptance_criteria.join("\n")),
            ];
            match run_shell(&command, &envs, self.timeout).await {
                Ok(output) if output.success() => parse_coverage(&output.stdout),
                Ok(output) => Err(SwarmError::StageError(format!(
                    "criteria command failed: {}",
                    output.combined().trim()
                ))),
                Err(ShellError::TimedOut(limit)) => Err(SwarmError::StageError(format!(
                    "criteria command timed out after {}s",
                    limit.as_secs()
                ))),
                Err(ShellError::Spawn(e)) => Err(SwarmError::IoError(e)),
                Err(ShellError::Io(e)) => Err(e),
            }
        })
    }
}

/// Writes every event to the log as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingBroadcaster;

impl EventBroadcaster for TracingBroadcaster {
    fn publish(&self, event: SwarmEvent) -> PortFuture<'_, ()> {
        Box::pin(async move {
            let payload = serde_json::to_string(&event)?;
            info!(event = %payload, "swarm event");
            Ok(())
        })
    }
}

/// Source control that does nothing; the branch name is still derived.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSourceControl;

impl SourceControl for NoopSourceControl {
    fn create_worker_branch<'a>(
        &'a self,
        worker_id: &'a WorkerId,
        task_key: &'a TaskKey,
    ) -> PortFuture<'a, String> {
        Box::pin(async move { Ok(format!("swarm/{worker_id}/{task_key}")) })
    }

    fn commit_changes<'a>(&'a self, _task_key: &'a TaskKey, _message: &'a str) -> PortFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Never asks for a refactor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReviewer;

impl StaticReviewer for NoopReviewer {
    fn review<'a>(&'a self, _task: &'a Task) -> PortFuture<'a, Vec<String>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}
