#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

mod circuit_queries;
mod run_queries;
mod task_queries;
mod types;
mod worker_queries;

pub(crate) use task_queries::TASK_COLUMNS;
pub(crate) use types::*;
