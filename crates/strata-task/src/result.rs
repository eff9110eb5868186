//! Execution results and the wire result message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ErrorDetail, TaskError};

/// Terminal status of one task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
  Succeeded,
  Failed,
  Cancelled,
}

/// Outcome of one task attempt. Produced exactly once per attempt.
///
/// `output_refs` is non-empty iff `status` is [`ResultStatus::Succeeded`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
  pub task_id: String,
  pub attempt: u32,
  pub status: ResultStatus,
  /// Store keys of the registered output artifacts.
  pub output_refs: Vec<String>,
  /// Tool exit code, when the tool ran to completion.
  pub exit_code: Option<i32>,
  pub error: Option<TaskError>,
}

impl ExecutionResult {
  /// Build a succeeded result.
  pub fn succeeded(
    task_id: impl Into<String>,
    attempt: u32,
    output_refs: Vec<String>,
    exit_code: Option<i32>,
  ) -> Self {
    Self {
      task_id: task_id.into(),
      attempt,
      status: ResultStatus::Succeeded,
      output_refs,
      exit_code,
      error: None,
    }
  }

  /// Build a terminal result from an error. [`TaskError::Cancelled`] resolves
  /// the attempt as `cancelled`, everything else as `failed`.
  pub fn from_error(task_id: impl Into<String>, attempt: u32, error: TaskError) -> Self {
    let (status, exit_code) = match &error {
      TaskError::Cancelled => (ResultStatus::Cancelled, None),
      TaskError::ToolExecution { exit_code, .. } => (ResultStatus::Failed, *exit_code),
      _ => (ResultStatus::Failed, None),
    };
    Self {
      task_id: task_id.into(),
      attempt,
      status,
      output_refs: Vec::new(),
      exit_code,
      error: match status {
        ResultStatus::Cancelled => None,
        _ => Some(error),
      },
    }
  }

  /// Serialize into the message published to the orchestrator.
  pub fn to_message(&self) -> ResultMessage {
    ResultMessage {
      task_id: self.task_id.clone(),
      attempt: self.attempt,
      status: self.status,
      output_refs: self.output_refs.clone(),
      error: self.error.as_ref().map(ErrorDetail::from),
      finished_at: Utc::now(),
    }
  }
}

/// Wire form of an execution result.
///
/// Delivery upstream is at-least-once; consumers deduplicate on
/// `(task_id, attempt)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
  pub task_id: String,
  pub attempt: u32,
  pub status: ResultStatus,
  pub output_refs: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<ErrorDetail>,
  pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cancelled_error_resolves_as_cancelled() {
    let result = ExecutionResult::from_error("t1", 1, TaskError::Cancelled);
    assert_eq!(result.status, ResultStatus::Cancelled);
    assert!(result.error.is_none());
    assert!(result.output_refs.is_empty());
  }

  #[test]
  fn tool_failure_carries_exit_code_and_detail() {
    let result = ExecutionResult::from_error(
      "t1",
      2,
      TaskError::ToolExecution {
        exit_code: Some(1),
        stderr_tail: "bad format".to_string(),
      },
    );
    assert_eq!(result.status, ResultStatus::Failed);
    assert_eq!(result.exit_code, Some(1));

    let message = result.to_message();
    let error = message.error.expect("error detail");
    assert_eq!(error.kind, "ToolExecutionError");
    assert_eq!(error.message, "bad format");
  }

  #[test]
  fn message_serializes_snake_case_status() {
    let message = ExecutionResult::succeeded("t1", 1, vec!["t1/1/timeline.plaso".into()], Some(0))
      .to_message();
    let json = serde_json::to_value(&message).expect("serialize");
    assert_eq!(json["status"], "succeeded");
    assert_eq!(json["output_refs"][0], "t1/1/timeline.plaso");
    assert!(json.get("error").is_none());
  }
}
