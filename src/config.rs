#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Orchestrator configuration.
//!
//! Values come from an optional `key = "value"` file, then `SWARM_<KEY>`
//! environment variables override them. Numbers that fail to parse fall back
//! to their default; numbers outside their range are clamped.

use crate::error::{Result, SwarmError};
use crate::types::{BudgetLimit, CircuitConfig, DEFAULT_MAX_INVOCATIONS};
use crate::worker::GreenRetryPolicy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = ".swarm/config.toml";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://.swarm/swarm.db";

const KEYS: [&str; 18] = [
    "database_url",
    "max_workers",
    "claim_timeout_secs",
    "max_green_attempts",
    "max_green_retry_time_seconds",
    "green_retry_delay_ms",
    "max_invocations",
    "heartbeat_interval_secs",
    "stage_timeout_secs",
    "circuit_failure_threshold",
    "circuit_success_threshold",
    "circuit_reset_timeout_secs",
    "agent_cmd",
    "test_cmd",
    "lint_cmd",
    "typecheck_cmd",
    "export_check_cmd",
    "criteria_cmd",
];

/// Shell commands behind the check-tool and agent adapters. `{target}` is
/// replaced with the file under test, already shell-quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommands {
    pub agent: Option<String>,
    pub test: String,
    pub lint: String,
    pub typecheck: String,
    pub export_check: Option<String>,
    pub criteria: Option<String>,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self {
            agent: None,
            test: "python -m pytest -q {target}".to_string(),
            lint: "ruff check {target}".to_string(),
            typecheck: "mypy {target}".to_string(),
            export_check: None,
            criteria: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub database_url: String,
    pub max_workers: u32,
    pub claim_timeout_secs: u64,
    pub max_green_attempts: u32,
    pub max_green_retry_time_seconds: u64,
    pub green_retry_delay_ms: u64,
    pub max_invocations: u64,
    pub heartbeat_interval_secs: u64,
    pub stage_timeout_secs: u64,
    pub circuit_failure_threshold: u32,
    pub circuit_success_threshold: u32,
    pub circuit_reset_timeout_secs: u64,
    pub commands: ToolCommands,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl OrchestratorConfig {
    /// Build a config from a single key lookup. Keys are the file keys
    /// (`max_workers`, `test_cmd`, ...).
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str, default: u64, min: u64, max: u64| {
            parse_clamped(lookup(key).as_deref(), default, min, max)
        };
        let small = |key: &str, default: u32, min: u32, max: u32| {
            u32::try_from(number(key, default.into(), min.into(), max.into())).unwrap_or(default)
        };
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = ToolCommands::default();
        let budget = BudgetLimit::new(number(
            "max_invocations",
            DEFAULT_MAX_INVOCATIONS,
            1,
            u64::MAX,
        ));
        let green = GreenRetryPolicy::from_raw(
            lookup("max_green_attempts").as_deref(),
            lookup("max_green_retry_time_seconds").as_deref(),
            lookup("green_retry_delay_ms").as_deref(),
        );

        Self {
            database_url: text("database_url")
                .map(|url| expand_env_vars(&url, &lookup))
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            max_workers: small("max_workers", 4, 1, 64),
            claim_timeout_secs: number("claim_timeout_secs", 1_800, 30, 86_400),
            max_green_attempts: green.max_attempts(),
            max_green_retry_time_seconds: green.max_elapsed().as_secs(),
            green_retry_delay_ms: u64::try_from(green.delay().as_millis()).unwrap_or(0),
            max_invocations: budget.max_invocations(),
            heartbeat_interval_secs: number("heartbeat_interval_secs", 15, 1, 300),
            stage_timeout_secs: number("stage_timeout_secs", 900, 10, 7_200),
            circuit_failure_threshold: small("circuit_failure_threshold", 5, 1, 1_000),
            circuit_success_threshold: small("circuit_success_threshold", 3, 1, 1_000),
            circuit_reset_timeout_secs: number("circuit_reset_timeout_secs", 60, 1, 86_400),
            commands: ToolCommands {
                agent: text("agent_cmd"),
                test: text("test_cmd").unwrap_or(defaults.test),
                lint: text("lint_cmd").unwrap_or(defaults.lint),
                typecheck: text("typecheck_cmd").unwrap_or(defaults.typecheck),
                export_check: text("export_check_cmd"),
                criteria: text("criteria_cmd"),
            },
        }
    }

    /// Layer `SWARM_<KEY>` variables (and `DATABASE_URL`) over file content.
    #[must_use]
    pub fn resolve_from<F>(file_content: Option<&str>, env_lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let file_values = file_content.map(parse_config_content).unwrap_or_default();
        Self::from_lookup(|key| {
            let env_key = format!("SWARM_{}", key.to_ascii_uppercase());
            env_lookup(&env_key)
                .or_else(|| (key == "database_url").then(|| env_lookup("DATABASE_URL")).flatten())
                .or_else(|| file_values.get(key).cloned())
                .or_else(|| (!KEYS.contains(&key)).then(|| env_lookup(key)).flatten())
        })
    }

    #[must_use]
    pub fn green_retry_policy(&self) -> GreenRetryPolicy {
        GreenRetryPolicy::new(
            self.max_green_attempts,
            Duration::from_secs(self.max_green_retry_time_seconds),
            Duration::from_millis(self.green_retry_delay_ms),
        )
    }

    #[must_use]
    pub const fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig::new(
            self.circuit_failure_threshold,
            self.circuit_success_threshold,
            self.circuit_reset_timeout_secs,
            300,
        )
    }

    #[must_use]
    pub fn budget_limit(&self) -> BudgetLimit {
        BudgetLimit::new(self.max_invocations)
    }

    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    #[must_use]
    pub const fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

/// Read `path` (default `.swarm/config.toml`) if it exists and overlay the
/// process environment.
///
/// # Errors
/// Returns an error if the file exists but cannot be read.
pub async fn load_config(path: Option<PathBuf>) -> Result<OrchestratorConfig> {
    let config_path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let content = read_optional(&config_path).await?;
    Ok(OrchestratorConfig::resolve_from(
        content.as_deref(),
        |key| std::env::var(key).ok(),
    ))
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SwarmError::ConfigError(format!(
            "Failed to read config {}: {e}",
            path.display()
        ))),
    }
}

#[must_use]
pub fn parse_config_content(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('['))
        .filter_map(|line| {
            KEYS.iter()
                .find_map(|key| parse_key_value(line, key).map(|value| (key.to_string(), value.to_string())))
        })
        .collect()
}

#[must_use]
pub fn parse_key_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split_once('=')
        .and_then(|(lhs, rhs)| (lhs.trim() == key).then_some(rhs.trim().trim_matches('"')))
}

/// Parse an integer; malformed input gives `default`, out-of-range input is clamped.
#[must_use]
pub fn parse_clamped(raw: Option<&str>, default: u64, min: u64, max: u64) -> u64 {
    raw.map(str::trim)
        .and_then(|value| value.parse::<i128>().ok())
        .map_or(default, |value| {
            let clamped = value.clamp(i128::from(min), i128::from(max));
            u64::try_from(clamped).unwrap_or(default)
        })
}

/// Expand `${VAR}` and `${VAR:-default}` references.
fn expand_env_vars<F>(input: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = input.to_string();
    while let Some(start) = result.find("${") {
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var_part = &result[start + 2..start + end];
        let (var_name, default) = var_part.split_once(":-").unwrap_or((var_part, ""));
        let value = lookup(var_name).unwrap_or_else(|| default.to_string());
        result.replace_range(start..=(start + end), &value);
    }
    result
}
