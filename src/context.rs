#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::adapters::{
    CommandAgent, NoopReviewer, NoopSourceControl, ShellCheckTool, ShellCriteriaMatcher,
    ShellExportChecker, TracingBroadcaster,
};
use crate::budget_guard::InvocationBudgetGuard;
use crate::circuit_breaker::CircuitBreakerService;
use crate::config::OrchestratorConfig;
use crate::db::SwarmDb;
use crate::error::{Result, SwarmError};
use crate::pool::WorkerPool;
use crate::ports::SystemClock;
use crate::run_validator::RunValidator;
use crate::worker::{Collaborators, WorkerSettings};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Owns everything a run needs: config, store handle, breaker service,
/// budget guard and collaborators. Build one per process and pass it down.
pub struct OrchestratorContext {
    config: OrchestratorConfig,
    db: SwarmDb,
    circuits: CircuitBreakerService,
    budget: InvocationBudgetGuard,
    collaborators: Collaborators,
    schema_ready: OnceCell<()>,
    shut_down: AtomicBool,
}

impl OrchestratorContext {
    /// Connect to the configured database and wire the shell-backed
    /// collaborators from `config.commands`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn connect(config: OrchestratorConfig) -> Result<Self> {
        let db = SwarmDb::new(&config.database_url).await?;
        let collaborators = default_collaborators(&config);
        Ok(Self::with_parts(config, db, collaborators))
    }

    #[must_use]
    pub fn with_parts(config: OrchestratorConfig, db: SwarmDb, collaborators: Collaborators) -> Self {
        let circuits = CircuitBreakerService::new(db.clone(), config.circuit_config())
            .with_broadcaster(Arc::clone(&collaborators.broadcaster));
        let budget = InvocationBudgetGuard::new(db.clone(), config.budget_limit());
        Self {
            config,
            db,
            circuits,
            budget,
            collaborators,
            schema_ready: OnceCell::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Apply the schema. Later calls return immediately.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be applied.
    pub async fn initialize(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                self.db.initialize_schema().await?;
                info!("Schema ready");
                Ok::<(), SwarmError>(())
            })
            .await
            .map(|_ready| ())
    }

    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    #[must_use]
    pub const fn db(&self) -> &SwarmDb {
        &self.db
    }

    #[must_use]
    pub const fn circuits(&self) -> &CircuitBreakerService {
        &self.circuits
    }

    #[must_use]
    pub const fn budget(&self) -> &InvocationBudgetGuard {
        &self.budget
    }

    #[must_use]
    pub const fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    #[must_use]
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            claim_timeout_secs: self.config.claim_timeout_secs,
            heartbeat_interval: self.config.heartbeat_interval(),
            stage_timeout: self.config.stage_timeout(),
            green: self.config.green_retry_policy(),
        }
    }

    #[must_use]
    pub fn run_validator(&self) -> RunValidator {
        let commands = &self.config.commands;
        let mut validator = RunValidator::new(
            self.db.clone(),
            Arc::clone(&self.collaborators.tests),
            Arc::clone(&self.collaborators.lint),
            Arc::clone(&self.collaborators.typecheck),
        );
        if let Some(template) = &commands.export_check {
            validator = validator.with_export_checker(Arc::new(ShellExportChecker::new(
                template.clone(),
                self.config.stage_timeout(),
            )));
        }
        if let Some(template) = &commands.criteria {
            validator = validator.with_criteria_matcher(Arc::new(ShellCriteriaMatcher::new(
                template.clone(),
                self.config.stage_timeout(),
            )));
        }
        validator
    }

    /// A pool over this context's store and collaborators, with run validation.
    #[must_use]
    pub fn worker_pool(&self) -> WorkerPool {
        WorkerPool::new(
            self.db.clone(),
            self.collaborators.clone(),
            self.budget.clone(),
            self.circuits.clone(),
            self.config.max_workers,
            self.worker_settings(),
        )
        .with_validator(self.run_validator())
    }

    /// Close the store. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.db.close().await;
        info!("Orchestrator shut down");
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

/// Shell-backed collaborators built from the configured commands.
#[must_use]
pub fn default_collaborators(config: &OrchestratorConfig) -> Collaborators {
    let timeout = config.stage_timeout();
    let commands = &config.commands;
    Collaborators {
        agent: Arc::new(CommandAgent::new(commands.agent.clone(), timeout)),
        tests: Arc::new(ShellCheckTool::new("tests", commands.test.clone(), timeout)),
        lint: Arc::new(ShellCheckTool::new("lint", commands.lint.clone(), timeout)),
        typecheck: Arc::new(ShellCheckTool::new("typecheck", commands.typecheck.clone(), timeout)),
        source_control: Arc::new(NoopSourceControl),
        reviewer: Arc::new(NoopReviewer),
        broadcaster: Arc::new(TracingBroadcaster),
        clock: Arc::new(SystemClock),
    }
}

#[cfg(test)]
mod tests {
    use super::{default_collaborators, OrchestratorContext};
    use crate::config::OrchestratorConfig;
    use crate::db::SwarmDb;

    async fn context() -> (OrchestratorContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir failed: {e}"));
        let url = format!("sqlite://{}", dir.path().join("ctx.db").display());
        let db = SwarmDb::new(&url)
            .await
            .unwrap_or_else(|e| unreachable!("db open failed: {e}"));
        let config = OrchestratorConfig::default();
        let collaborators = default_collaborators(&config);
        (OrchestratorContext::with_parts(config, db, collaborators), dir)
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let (ctx, _dir) = context().await;
        assert!(ctx.initialize().await.is_ok());
        assert!(ctx.initialize().await.is_ok());
        assert_eq!(ctx.db().count_tasks().await.ok(), Some(0));
    }

    #[tokio::test]
    async fn shutdown_twice_is_harmless() {
        let (ctx, _dir) = context().await;
        assert!(!ctx.is_shut_down());
        ctx.shutdown().await;
        ctx.shutdown().await;
        assert!(ctx.is_shut_down());
    }

    #[tokio::test]
    async fn worker_settings_follow_config() {
        let (ctx, _dir) = context().await;
        let settings = ctx.worker_settings();
        assert_eq!(settings.claim_timeout_secs, 1_800);
        assert_eq!(settings.green.max_attempts(), 2);
        assert_eq!(ctx.worker_pool().max_workers(), 4);
    }
}
