#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

mod circuit_ops;
mod invocation_ops;
mod run_ops;
mod task_ops;
mod worker_ops;

pub use circuit_ops::CircuitTransition;
