//! Task payload types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single unit of queued work: process one evidence artifact.
///
/// Tasks are owned by the orchestrator. The worker only holds a transient
/// lease on a task while executing one attempt of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  /// Unique ID, assigned by the orchestrator per submission.
  pub task_id: String,
  /// Reference to the input artifact in the shared store.
  pub input_ref: String,
  /// Raw tool options as submitted. Validated into
  /// [`TaskOptions`](crate::TaskOptions) before execution.
  #[serde(default)]
  pub options: BTreeMap<String, String>,
}

impl Task {
  /// Create a task with no options.
  pub fn new(task_id: impl Into<String>, input_ref: impl Into<String>) -> Self {
    Self {
      task_id: task_id.into(),
      input_ref: input_ref.into(),
      options: BTreeMap::new(),
    }
  }

  /// File name portion of the input reference, used to name the staged copy.
  ///
  /// Falls back to `"input"` when the reference has no usable final segment.
  pub fn input_file_name(&self) -> &str {
    let name = self
      .input_ref
      .rsplit('/')
      .next()
      .unwrap_or(self.input_ref.as_str());
    if name.is_empty() { "input" } else { name }
  }
}

/// Lifecycle state of a task, as tracked by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  Queued,
  Running,
  Succeeded,
  Failed,
  Cancelled,
}
