//! Strata Events
//!
//! Status events emitted while a task attempt executes, so the orchestrating
//! pipeline can track task state. Per attempt the sequence is `started`,
//! zero or more `progress`, and exactly one terminal event (`succeeded`,
//! `failed`, or `cancelled`).
//!
//! Delivery is at-least-once; every event carries `(task_id, attempt)` so
//! consumers can deduplicate across re-deliveries.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use strata_task::{ErrorDetail, ExecutionResult, ResultStatus};

/// A status event for one task attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
  /// The attempt has started executing.
  Started { task_id: String, attempt: u32 },

  /// Best-effort progress counters parsed from the tool's status output.
  /// Not guaranteed monotonic across re-delivered attempts.
  Progress {
    task_id: String,
    attempt: u32,
    counters: BTreeMap<String, u64>,
  },

  /// The attempt succeeded with the given output artifacts.
  Succeeded {
    task_id: String,
    attempt: u32,
    output_refs: Vec<String>,
  },

  /// The attempt failed.
  Failed {
    task_id: String,
    attempt: u32,
    error: ErrorDetail,
  },

  /// The attempt was cancelled by the orchestrator.
  Cancelled { task_id: String, attempt: u32 },
}

impl TaskEvent {
  /// Build a started event.
  pub fn started(task_id: impl Into<String>, attempt: u32) -> Self {
    Self::Started {
      task_id: task_id.into(),
      attempt,
    }
  }

  /// Build a progress event.
  pub fn progress(
    task_id: impl Into<String>,
    attempt: u32,
    counters: BTreeMap<String, u64>,
  ) -> Self {
    Self::Progress {
      task_id: task_id.into(),
      attempt,
      counters,
    }
  }

  /// Build the terminal event for an execution result.
  pub fn from_result(result: &ExecutionResult) -> Self {
    match result.status {
      ResultStatus::Succeeded => Self::Succeeded {
        task_id: result.task_id.clone(),
        attempt: result.attempt,
        output_refs: result.output_refs.clone(),
      },
      ResultStatus::Cancelled => Self::Cancelled {
        task_id: result.task_id.clone(),
        attempt: result.attempt,
      },
      ResultStatus::Failed => Self::Failed {
        task_id: result.task_id.clone(),
        attempt: result.attempt,
        error: result
          .error
          .as_ref()
          .map(ErrorDetail::from)
          .unwrap_or_else(|| ErrorDetail {
            kind: "ToolExecutionError".to_string(),
            message: "task failed".to_string(),
          }),
      },
    }
  }

  /// The task this event belongs to.
  pub fn task_id(&self) -> &str {
    match self {
      Self::Started { task_id, .. }
      | Self::Progress { task_id, .. }
      | Self::Succeeded { task_id, .. }
      | Self::Failed { task_id, .. }
      | Self::Cancelled { task_id, .. } => task_id,
    }
  }

  /// The attempt number this event belongs to.
  pub fn attempt(&self) -> u32 {
    match self {
      Self::Started { attempt, .. }
      | Self::Progress { attempt, .. }
      | Self::Succeeded { attempt, .. }
      | Self::Failed { attempt, .. }
      | Self::Cancelled { attempt, .. } => *attempt,
    }
  }

  /// Whether this event resolves the attempt.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      Self::Succeeded { .. } | Self::Failed { .. } | Self::Cancelled { .. }
    )
  }
}

/// Trait for reporting task events.
///
/// Implementations decide what to do with them (publish to the broker,
/// collect in tests, log, ignore). Reporting is best-effort: implementations
/// must not fail the attempt over a lost event.
#[async_trait]
pub trait Reporter: Send + Sync {
  /// Called for each event of an attempt.
  async fn report(&self, event: TaskEvent);
}

/// A no-op reporter that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopReporter;

#[async_trait]
impl Reporter for NoopReporter {
  async fn report(&self, _event: TaskEvent) {}
}

/// A reporter that sends events to an unbounded channel.
///
/// The channel is unbounded so reporting never blocks the execution unit on
/// a slow consumer; event volume is a handful per attempt.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
  sender: mpsc::UnboundedSender<TaskEvent>,
}

impl ChannelReporter {
  /// Create a reporter and the receiving half of its channel.
  pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self { sender }, receiver)
  }
}

#[async_trait]
impl Reporter for ChannelReporter {
  async fn report(&self, event: TaskEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use strata_task::TaskError;

  #[test]
  fn terminal_event_matches_result_status() {
    let ok = ExecutionResult::succeeded("t1", 1, vec!["t1/1/out.plaso".into()], Some(0));
    assert!(matches!(
      TaskEvent::from_result(&ok),
      TaskEvent::Succeeded { .. }
    ));

    let failed = ExecutionResult::from_error("t1", 1, TaskError::staging("io"));
    let event = TaskEvent::from_result(&failed);
    assert!(event.is_terminal());
    match event {
      TaskEvent::Failed { error, .. } => assert_eq!(error.kind, "StagingError"),
      other => panic!("expected failed event, got {other:?}"),
    }

    let cancelled = ExecutionResult::from_error("t1", 3, TaskError::Cancelled);
    let event = TaskEvent::from_result(&cancelled);
    assert!(matches!(event, TaskEvent::Cancelled { attempt: 3, .. }));
  }

  #[test]
  fn events_serialize_with_tag() {
    let event = TaskEvent::started("t1", 1);
    let json = serde_json::to_value(&event).expect("serialize");
    assert_eq!(json["event"], "started");
    assert_eq!(json["task_id"], "t1");
    assert_eq!(json["attempt"], 1);
  }

  #[tokio::test]
  async fn channel_reporter_delivers_in_order() {
    let (reporter, mut receiver) = ChannelReporter::new();
    reporter.report(TaskEvent::started("t1", 1)).await;
    reporter
      .report(TaskEvent::progress("t1", 1, BTreeMap::new()))
      .await;

    assert!(matches!(receiver.recv().await, Some(TaskEvent::Started { .. })));
    assert!(matches!(receiver.recv().await, Some(TaskEvent::Progress { .. })));
  }
}
