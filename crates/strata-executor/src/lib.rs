//! Strata Executor
//!
//! The task execution unit: takes a leased task attempt from "received" to a
//! single [`ExecutionResult`](strata_task::ExecutionResult). In order it
//! validates the payload, stages the input into a fresh working directory,
//! builds the tool invocation, runs the adapter under a deadline, and
//! registers the outputs with the shared store.
//!
//! The unit never retries: a failed attempt is reported and retry policy is
//! the broker/orchestrator's via re-delivery. Each attempt gets its own
//! working directory, which is what makes re-processing safe.

mod executor;
mod workdir;

pub use executor::{ExecutorConfig, TaskExecutor};
pub use workdir::WorkDir;
