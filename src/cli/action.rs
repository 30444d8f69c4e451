#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::types::CircuitLevel;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliAction {
    ShowHelp,
    ShowVersion,
    Command(CliCommand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Work every phase and validate the run.
    Run { config: Option<PathBuf> },
    InitDb { config: Option<PathBuf> },
    /// Breaker health, optionally for one level.
    Health {
        config: Option<PathBuf>,
        level: Option<CircuitLevel>,
    },
}
