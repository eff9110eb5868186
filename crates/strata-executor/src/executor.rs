//! Task executor implementation.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use strata_artifact::{Store, register_file, stage_to_file};
use strata_events::{Reporter, TaskEvent};
use strata_task::{ExecutionResult, Task, TaskError, TaskOptions};
use strata_tool::{
  PlasoTools, RunOutcome, ToolAdapter, ToolError, ToolInvocation, is_ewf_set,
  parse_status_counters, yara_rules_path,
};

use crate::WorkDir;

/// Configuration for the task executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
  /// Base directory working directories are created under.
  pub work_root: std::path::PathBuf,
  /// Default tool deadline, overridable per task.
  pub tool_timeout: Duration,
  /// How often the tool's status file is polled for progress.
  pub progress_interval: Duration,
  /// Keep working directories after the attempt resolves, for diagnosis.
  pub keep_workdir: bool,
  /// Installed tool entry points.
  pub tools: PlasoTools,
}

/// Executes one task attempt end to end.
///
/// Shared, stateless across attempts: all per-attempt state lives in the
/// working directory and on the stack.
pub struct TaskExecutor {
  store: Arc<dyn Store>,
  adapter: Arc<dyn ToolAdapter>,
  reporter: Arc<dyn Reporter>,
  config: ExecutorConfig,
}

impl TaskExecutor {
  /// Create a new task executor.
  pub fn new(
    store: Arc<dyn Store>,
    adapter: Arc<dyn ToolAdapter>,
    reporter: Arc<dyn Reporter>,
    config: ExecutorConfig,
  ) -> Self {
    Self {
      store,
      adapter,
      reporter,
      config,
    }
  }

  /// Execute one attempt of a task.
  ///
  /// Always resolves to exactly one result; errors along the way become
  /// failed (or cancelled) results rather than propagating.
  #[instrument(
    name = "task_execute",
    skip(self, task, cancel),
    fields(task_id = %task.task_id, attempt = attempt)
  )]
  pub async fn execute(
    &self,
    task: &Task,
    attempt: u32,
    cancel: CancellationToken,
  ) -> ExecutionResult {
    info!(input_ref = %task.input_ref, "task started");
    self
      .reporter
      .report(TaskEvent::started(&task.task_id, attempt))
      .await;

    let result = match self.execute_inner(task, attempt, &cancel).await {
      Ok(result) => result,
      Err(error) => ExecutionResult::from_error(task.task_id.clone(), attempt, error),
    };

    match &result.error {
      None => {
        info!(status = ?result.status, outputs = result.output_refs.len(), "task resolved")
      }
      Some(error) => error!(kind = error.kind(), error = %error, "task failed"),
    }

    result
  }

  /// Inner execution logic; any error resolves the attempt.
  async fn execute_inner(
    &self,
    task: &Task,
    attempt: u32,
    cancel: &CancellationToken,
  ) -> Result<ExecutionResult, TaskError> {
    if cancel.is_cancelled() {
      return Err(TaskError::Cancelled);
    }

    // Validation happens before any filesystem work: an invalid task must
    // not create a working directory or touch the tool.
    let options = TaskOptions::parse(&task.options)?;
    if task.input_ref.trim().is_empty() {
      return Err(TaskError::invalid_task("empty input reference"));
    }
    let resolvable = self
      .store
      .exists(&task.input_ref)
      .await
      .map_err(map_store_error)?;
    if !resolvable {
      return Err(TaskError::invalid_task(format!(
        "input not found in store: {}",
        task.input_ref
      )));
    }

    let workdir = WorkDir::create(&self.config.work_root, &task.task_id)
      .await
      .map_err(map_io_error)?;

    let outcome = self
      .run_in_workdir(task, attempt, &options, &workdir, cancel)
      .await;

    if self.config.keep_workdir {
      debug!(path = %workdir.path().display(), "keeping working directory");
    } else {
      workdir.cleanup().await;
    }

    outcome
  }

  async fn run_in_workdir(
    &self,
    task: &Task,
    attempt: u32,
    options: &TaskOptions,
    workdir: &WorkDir,
    cancel: &CancellationToken,
  ) -> Result<ExecutionResult, TaskError> {
    // Stage the input. Zero-byte inputs are staged and run like any other;
    // whether they are processable is the tool's call.
    let input_path = workdir.input_path(task.input_file_name());
    let staged = stage_to_file(self.store.as_ref(), &task.input_ref, &input_path)
      .await
      .map_err(map_store_error)?;
    debug!(bytes = staged, path = %input_path.display(), "input staged");
    if is_ewf_set([input_path.as_path()]) {
      debug!("input looks like an EWF image segment");
    }

    if let Some(rules) = &options.yara_rules {
      tokio::fs::write(yara_rules_path(workdir.path()), rules)
        .await
        .map_err(map_io_error)?;
    }

    let invocation = self
      .config
      .tools
      .invocation(options, &input_path, workdir.path());
    let timeout = options.timeout.unwrap_or(self.config.tool_timeout);

    let outcome = self
      .run_with_progress(task, attempt, &invocation, workdir.path(), timeout, cancel)
      .await?;

    if !outcome.is_success() {
      return Err(TaskError::ToolExecution {
        exit_code: outcome.exit_code,
        stderr_tail: outcome.stderr_tail,
      });
    }
    if outcome.output_paths.is_empty() {
      return Err(TaskError::ToolExecution {
        exit_code: outcome.exit_code,
        stderr_tail: "tool did not produce any output files".to_string(),
      });
    }

    let output_refs = self
      .register_outputs(task, attempt, &invocation, &outcome)
      .await?;

    Ok(ExecutionResult::succeeded(
      task.task_id.clone(),
      attempt,
      output_refs,
      outcome.exit_code,
    ))
  }

  /// Run the adapter while polling the status file for progress events.
  async fn run_with_progress(
    &self,
    task: &Task,
    attempt: u32,
    invocation: &ToolInvocation,
    workdir: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
  ) -> Result<RunOutcome, TaskError> {
    let run = self
      .adapter
      .run(invocation, workdir, timeout, cancel.child_token());
    tokio::pin!(run);

    let mut poll = tokio::time::interval(self.config.progress_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so progress starts after
    // one full interval.
    poll.tick().await;

    let outcome = loop {
      tokio::select! {
        outcome = &mut run => break outcome,
        _ = poll.tick() => {
          if let Some(status_file) = &invocation.status_file {
            self.report_progress(task, attempt, status_file).await;
          }
        }
      }
    };

    match outcome {
      Ok(outcome) => Ok(outcome),
      Err(ToolError::Timeout { limit_secs }) => Err(TaskError::Timeout { limit_secs }),
      Err(ToolError::Cancelled) => Err(TaskError::Cancelled),
      Err(error @ (ToolError::Spawn { .. } | ToolError::Io(_))) => Err(TaskError::ToolExecution {
        exit_code: None,
        stderr_tail: error.to_string(),
      }),
    }
  }

  /// Best effort: a missing or garbled status file produces no event.
  async fn report_progress(&self, task: &Task, attempt: u32, status_file: &Path) {
    let Ok(raw) = tokio::fs::read_to_string(status_file).await else {
      return;
    };
    let counters = parse_status_counters(&raw);
    self
      .reporter
      .report(TaskEvent::progress(&task.task_id, attempt, counters))
      .await;
  }

  /// Register collected outputs with the store under attempt-scoped keys.
  ///
  /// Nothing is registered if any output fails to upload: partial artifact
  /// sets must not become visible to the orchestrator.
  async fn register_outputs(
    &self,
    task: &Task,
    attempt: u32,
    invocation: &ToolInvocation,
    outcome: &RunOutcome,
  ) -> Result<Vec<String>, TaskError> {
    let mut output_refs = Vec::with_capacity(outcome.output_paths.len());
    for path in &outcome.output_paths {
      let name = output_name(invocation, path);
      let key = format!("{}/{}/{}", task.task_id, attempt, name);
      if let Err(error) = register_file(self.store.as_ref(), path, &key).await {
        self.unregister(&output_refs).await;
        return Err(map_store_error(error));
      }
      output_refs.push(key);
    }
    Ok(output_refs)
  }

  async fn unregister(&self, keys: &[String]) {
    for key in keys {
      if let Err(error) = self.store.delete(key).await {
        warn!(key = %key, error = %error, "failed to remove partial output");
      }
    }
  }
}

/// Store key suffix for an output path: relative to the export directory for
/// directory outputs, the bare file name otherwise.
fn output_name(invocation: &ToolInvocation, path: &Path) -> String {
  if let Some(dir) = &invocation.output_dir {
    if let Ok(relative) = path.strip_prefix(dir) {
      return relative.to_string_lossy().into_owned();
    }
  }
  path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_else(|| "output".to_string())
}

fn map_store_error(error: strata_artifact::Error) -> TaskError {
  match error {
    strata_artifact::Error::NotFound(key) => {
      TaskError::staging(format!("artifact disappeared during staging: {key}"))
    }
    strata_artifact::Error::Io(error) => map_io_error(error),
  }
}

fn map_io_error(error: io::Error) -> TaskError {
  match error.kind() {
    io::ErrorKind::StorageFull => TaskError::resource(format!("disk exhausted: {error}")),
    _ => TaskError::staging(error.to_string()),
  }
}
