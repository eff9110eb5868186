//! Task error taxonomy.

use serde::{Deserialize, Serialize};

/// Errors a task attempt can resolve with.
///
/// Every variant maps to a stable wire kind via [`TaskError::kind`] so the
/// orchestrator can route on it. Retries are the broker's responsibility:
/// the worker never retries internally, it only reports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
  /// Malformed input reference or option set. Not retryable.
  #[error("invalid task: {message}")]
  InvalidTask { message: String },

  /// Input fetch or working-directory write failed. Retryable by re-delivery.
  #[error("staging failed: {message}")]
  Staging { message: String },

  /// The external tool exited non-zero or could not run.
  #[error("tool execution failed (exit code {exit_code:?}): {stderr_tail}")]
  ToolExecution {
    /// Exit code, `None` when the tool was killed by a signal or never ran.
    exit_code: Option<i32>,
    /// Bounded tail of the tool's diagnostic output.
    stderr_tail: String,
  },

  /// The tool exceeded its allotted time and was terminated.
  #[error("tool exceeded timeout of {limit_secs}s")]
  Timeout { limit_secs: u64 },

  /// Disk or memory exhaustion on this worker. Retryable, ideally elsewhere.
  #[error("resource exhausted: {message}")]
  Resource { message: String },

  /// The attempt was cancelled by the orchestrator. Resolves the task as
  /// `cancelled`, not `failed`.
  #[error("task cancelled")]
  Cancelled,
}

impl TaskError {
  /// Create an invalid-task error.
  pub fn invalid_task(message: impl Into<String>) -> Self {
    Self::InvalidTask {
      message: message.into(),
    }
  }

  /// Create a staging error.
  pub fn staging(message: impl Into<String>) -> Self {
    Self::Staging {
      message: message.into(),
    }
  }

  /// Create a resource-exhaustion error.
  pub fn resource(message: impl Into<String>) -> Self {
    Self::Resource {
      message: message.into(),
    }
  }

  /// Stable wire kind for this error.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::InvalidTask { .. } => "InvalidTaskError",
      Self::Staging { .. } => "StagingError",
      Self::ToolExecution { .. } => "ToolExecutionError",
      Self::Timeout { .. } => "TimeoutError",
      Self::Resource { .. } => "ResourceError",
      Self::Cancelled => "Cancelled",
    }
  }

  /// Whether this error came from the external tool rather than the worker.
  /// Timeouts count: the tool ran and did not finish in time.
  pub fn is_tool_failure(&self) -> bool {
    matches!(self, Self::ToolExecution { .. } | Self::Timeout { .. })
  }

  /// Whether re-delivering the task could plausibly succeed.
  pub fn is_retryable(&self) -> bool {
    !matches!(self, Self::InvalidTask { .. })
  }
}

/// Structured error detail as published in result messages and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
  pub kind: String,
  pub message: String,
}

impl From<&TaskError> for ErrorDetail {
  fn from(error: &TaskError) -> Self {
    let message = match error {
      // The tail alone is the actionable part for an operator.
      TaskError::ToolExecution { stderr_tail, .. } if !stderr_tail.is_empty() => {
        stderr_tail.clone()
      }
      other => other.to_string(),
    };
    Self {
      kind: error.kind().to_string(),
      message,
    }
  }
}
