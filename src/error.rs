#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use thiserror::Error;

/// Error code constants for type-safe error handling
pub mod code {
    pub const CLI_ERROR: &str = "CLI_ERROR";
    pub const NOTFOUND: &str = "NOTFOUND";
    pub const INVALID: &str = "INVALID";
    pub const CONFLICT: &str = "CONFLICT";
    pub const DEPENDENCY: &str = "DEPENDENCY";
    pub const INTERNAL: &str = "INTERNAL";
}

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Task error: {0}")]
    TaskError(String),

    #[error("Stage error: {0}")]
    StageError(String),

    #[error("Circuit breaker error: {0}")]
    CircuitError(String),

    #[error("Run error: {0}")]
    RunError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwarmError {
    /// Returns the protocol error code for this error
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) | Self::SerializationError(_) => code::INVALID,
            Self::DatabaseError(_) | Self::SqlxError(_) | Self::Internal(_) => code::INTERNAL,
            Self::TaskError(_) => code::NOTFOUND,
            Self::StageError(_) | Self::CircuitError(_) | Self::RunError(_) => code::CONFLICT,
            Self::IoError(_) => code::DEPENDENCY,
        }
    }

    /// Returns the exit code for this error
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigError(_) => 2,
            Self::DatabaseError(_) | Self::SqlxError(_) => 3,
            Self::TaskError(_) => 4,
            Self::StageError(_) => 5,
            Self::CircuitError(_) => 6,
            Self::RunError(_) => 7,
            Self::IoError(_) => 8,
            Self::SerializationError(_) => 9,
            Self::Internal(_) => 10,
        }
    }
}

/// Protocol error codes with a description and a suggested fix.
pub const ERROR_CODES: &[(&str, &str, &str)] = &[
    (
        code::CLI_ERROR,
        "Invalid CLI usage",
        "Run 'swarm --help' for valid options",
    ),
    (
        code::NOTFOUND,
        "Task was not found",
        "List tasks and verify the task key",
    ),
    (
        code::INVALID,
        "Invalid configuration or payload",
        "Check .swarm/config.toml and SWARM_* variables",
    ),
    (
        code::CONFLICT,
        "Conflicting state transition",
        "Inspect task and circuit state before retrying",
    ),
    (
        code::DEPENDENCY,
        "Missing system dependency",
        "Install the configured tool binary and retry",
    ),
    (
        code::INTERNAL,
        "Unexpected internal failure",
        "Inspect logs and retry command",
    ),
];

/// Get error code details (description and fix) for a given error code
#[must_use]
pub fn get_error_info(error_code: &str) -> Option<(&'static str, &'static str)> {
    ERROR_CODES
        .iter()
        .find(|(code, _, _)| *code == error_code)
        .map(|(_, desc, fix)| (*desc, *fix))
}

pub type Result<T> = std::result::Result<T, SwarmError>;

#[cfg(test)]
mod tests {
    use super::{get_error_info, SwarmError};

    #[test]
    fn config_errors_map_to_invalid_and_usage_exit_code() {
        let err = SwarmError::ConfigError("bad".to_string());
        assert_eq!(err.code(), "INVALID");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn every_error_code_has_description_and_fix() {
        for code in ["CLI_ERROR", "NOTFOUND", "INVALID", "CONFLICT", "DEPENDENCY", "INTERNAL"] {
            assert!(get_error_info(code).is_some(), "missing info for {code}");
        }
        assert!(get_error_info("NOPE").is_none());
    }
}
