#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

pub mod adapters;
pub mod budget_guard;
pub mod circuit_breaker;
pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod gate;
pub mod pool;
pub mod ports;
pub mod run_validator;
pub mod types;
pub mod worker;

pub use budget_guard::InvocationBudgetGuard;
pub use circuit_breaker::CircuitBreakerService;
pub use config::OrchestratorConfig;
pub use context::{default_collaborators, OrchestratorContext};
pub use db::SwarmDb;
pub use error::{Result, SwarmError};
pub use gate::PhaseGate;
pub use pool::{PhaseRunSummary, PoolRunSummary, WorkerPool};
pub use run_validator::RunValidator;
pub use types::*;
pub use worker::{Collaborators, Worker, WorkerReport, WorkerSettings, WorkerStop};
