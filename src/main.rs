#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use anyhow::Context as _;
use serde_json::json;
use swarm::cli::{parse_cli_args, CliAction, CliCommand, USAGE};
use swarm::config::load_config;
use swarm::error::{code, get_error_info};
use swarm::{OrchestratorContext, PoolRunSummary, StoppedReason, SwarmError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// State changes inside the breaker window that count as flapping.
const FLAPPING_MIN_CHANGES: u64 = 3;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let action = match parse_cli_args(&args) {
        Ok(action) => action,
        Err(e) => {
            eprintln!("error [{}]: {e}", code::CLI_ERROR);
            report_hint(code::CLI_ERROR);
            eprintln!("\n{USAGE}");
            std::process::exit(2);
        }
    };

    let exit_code = match action {
        CliAction::ShowHelp => {
            println!("{USAGE}");
            0
        }
        CliAction::ShowVersion => {
            println!("swarm {}", env!("CARGO_PKG_VERSION"));
            0
        }
        CliAction::Command(command) => match run_command(command).await {
            Ok(()) => 0,
            Err(e) => {
                error!(error = %format!("{e:#}"), "Command failed");
                match e.downcast_ref::<SwarmError>() {
                    Some(swarm_error) => {
                        eprintln!("error [{}]: {e:#}", swarm_error.code());
                        report_hint(swarm_error.code());
                        swarm_error.exit_code()
                    }
                    None => {
                        eprintln!("error: {e:#}");
                        1
                    }
                }
            }
        },
    };
    std::process::exit(exit_code);
}

fn report_hint(error_code: &str) {
    if let Some((description, fix)) = get_error_info(error_code) {
        eprintln!("hint: {description}. {fix}");
    }
}

async fn run_command(command: CliCommand) -> anyhow::Result<()> {
    match command {
        CliCommand::Run { config } => {
            let ctx = connect(config).await?;
            let outcome = ctx.worker_pool().run_all_phases().await;
            ctx.shutdown().await;
            let summary = outcome?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            ensure_run_succeeded(&summary)?;
            Ok(())
        }
        CliCommand::InitDb { config } => {
            let ctx = connect(config).await?;
            info!(database_url = %ctx.config().database_url, "Database initialized");
            println!("{}", json!({ "database_url": ctx.config().database_url, "initialized": true }));
            ctx.shutdown().await;
            Ok(())
        }
        CliCommand::Health { config, level } => {
            let ctx = connect(config).await?;
            let summary = ctx.circuits().health(level).await;
            let flapping = ctx.circuits().flapping(FLAPPING_MIN_CHANGES).await;
            ctx.shutdown().await;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "health": summary?, "flapping": flapping? }))?
            );
            Ok(())
        }
    }
}

async fn connect(config: Option<std::path::PathBuf>) -> anyhow::Result<OrchestratorContext> {
    let config = load_config(config).await?;
    let ctx = OrchestratorContext::connect(config)
        .await
        .context("Failed to open swarm database")?;
    ctx.initialize().await?;
    Ok(ctx)
}

fn ensure_run_succeeded(summary: &PoolRunSummary) -> Result<(), SwarmError> {
    match summary.stopped_reason {
        StoppedReason::BudgetExhausted | StoppedReason::GateFailure | StoppedReason::AgentUnavailable => {
            Err(SwarmError::RunError(format!("run stopped: {}", summary.stopped_reason)))
        }
        StoppedReason::None | StoppedReason::NoTasks => match &summary.validation {
            Some(report) if !report.passed => Err(SwarmError::RunError(
                "run validation failed".to_string(),
            )),
            _ => Ok(()),
        },
    }
}
