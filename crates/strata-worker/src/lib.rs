//! Strata Worker
//!
//! The worker runtime: a fixed set of pull-execute-acknowledge loops over a
//! shared broker. Each loop pulls one leased delivery at a time, hands it to
//! the execution unit, then publishes the terminal event and result before
//! acknowledging. A crash between pull and ack leaves the lease to expire
//! and the task to be re-delivered; nothing is lost, some work may repeat.
//!
//! Shutdown is a drain: on cancellation the loops stop pulling, finish their
//! in-flight attempt, and exit.

mod worker;

pub use worker::{Worker, WorkerError, WorkerOptions};
