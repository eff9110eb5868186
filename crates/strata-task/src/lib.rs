//! Strata Task
//!
//! Core task types for the strata worker: the wire payload consumed from the
//! broker, the validated option set, the error taxonomy, and the execution
//! result produced exactly once per attempt.
//!
//! A [`Task`] arrives with a free-form string option map. The execution unit
//! turns that map into [`TaskOptions`] before doing any filesystem work;
//! validation failure is a [`TaskError::InvalidTask`] and never reaches the
//! external tool.

mod error;
mod options;
mod result;
mod task;

pub use error::{ErrorDetail, TaskError};
pub use options::{TaskOptions, ToolKind};
pub use result::{ExecutionResult, ResultMessage, ResultStatus};
pub use task::{Task, TaskStatus};
