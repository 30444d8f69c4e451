#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::action::{CliAction, CliCommand};
use super::args::ensure_no_unknown_flags;
use crate::types::CircuitLevel;
use std::path::PathBuf;
use thiserror::Error;

pub const USAGE: &str = "\
Usage: swarm <command> [options]

Commands:
  run [--config PATH]                   Work every phase, then validate the run
  init-db [--config PATH]               Create the swarm database schema
  health [--config PATH] [--level L]    Circuit breaker health (task|stage|worker|pipeline|system)

Options:
  -h, --help       Show this help
  -v, --version    Show version";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("Missing value for --{arg}")]
    MissingRequiredArg { arg: String },
    #[error("Unknown command: {cmd}")]
    UnknownCommand { cmd: String },
    #[error("Unknown flag: {flag}")]
    UnknownFlag { flag: String },
    #[error("Invalid value for --{arg}: {error}")]
    InvalidArgValue { arg: String, error: String },
    #[error("Unexpected argument: {arg}")]
    UnexpectedArgument { arg: String },
}

/// Parse the arguments after the program name.
///
/// # Errors
/// Returns `CliError` for unknown commands, unknown flags, or flags missing a value.
pub fn parse_cli_args(args: &[String]) -> Result<CliAction, CliError> {
    let Some(first) = args.first() else {
        return Ok(CliAction::ShowHelp);
    };

    match first.as_str() {
        "-h" | "--help" | "help" => Ok(CliAction::ShowHelp),
        "-v" | "--version" | "version" => Ok(CliAction::ShowVersion),
        _ if args.iter().skip(1).any(|arg| arg == "--help" || arg == "-h") => {
            Ok(CliAction::ShowHelp)
        }
        "run" => {
            ensure_no_unknown_flags(args, &["--config"])?;
            ensure_no_positionals(args)?;
            Ok(CliAction::Command(CliCommand::Run {
                config: parse_optional_arg(args, "config")?.map(PathBuf::from),
            }))
        }
        "init-db" => {
            ensure_no_unknown_flags(args, &["--config"])?;
            ensure_no_positionals(args)?;
            Ok(CliAction::Command(CliCommand::InitDb {
                config: parse_optional_arg(args, "config")?.map(PathBuf::from),
            }))
        }
        "health" => {
            ensure_no_unknown_flags(args, &["--config", "--level"])?;
            ensure_no_positionals(args)?;
            let level = parse_optional_arg(args, "level")?
                .map(|raw| {
                    CircuitLevel::try_from(raw.as_str()).map_err(|error| {
                        CliError::InvalidArgValue {
                            arg: "level".to_string(),
                            error,
                        }
                    })
                })
                .transpose()?;
            Ok(CliAction::Command(CliCommand::Health {
                config: parse_optional_arg(args, "config")?.map(PathBuf::from),
                level,
            }))
        }
        other => Err(CliError::UnknownCommand {
            cmd: other.to_string(),
        }),
    }
}

/// `--flag value` lookup. Underscores in `arg` match dashes on the command line.
fn parse_optional_arg(args: &[String], arg: &str) -> Result<Option<String>, CliError> {
    let flag = format!("--{}", arg.replace('_', "-"));
    args.iter()
        .position(|candidate| candidate == &flag)
        .map_or(Ok(None), |index| {
            args.get(index + 1)
                .filter(|value| !value.starts_with("--"))
                .cloned()
                .map(Some)
                .ok_or_else(|| CliError::MissingRequiredArg {
                    arg: arg.to_string(),
                })
        })
}

/// Only flag values may follow the command.
fn ensure_no_positionals(args: &[String]) -> Result<(), CliError> {
    let mut expecting_value = false;
    for arg in args.iter().skip(1) {
        if expecting_value {
            expecting_value = false;
        } else if arg.starts_with("--") {
            expecting_value = true;
        } else {
            return Err(CliError::UnexpectedArgument { arg: arg.clone() });
        }
    }
    Ok(())
}
