//! Worker runtime end-to-end over the in-memory broker.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use strata_artifact::{FsStore, register_file};
use strata_broker::{Broker, BrokerReporter, MemoryBroker};
use strata_events::TaskEvent;
use strata_executor::{ExecutorConfig, TaskExecutor};
use strata_task::{ResultStatus, Task};
use strata_tool::{PlasoTools, RunOutcome, ToolAdapter, ToolError, ToolInvocation};
use strata_worker::{Worker, WorkerOptions};

enum Behavior {
  Succeed,
  Fail,
  /// Sleep until cancelled, honoring the token like the real adapter.
  HangUntilCancelled,
  /// Ignore the token and finish after a delay; models drain-on-shutdown.
  SlowSucceed(Duration),
}

struct StubTool {
  behavior: Behavior,
  calls: AtomicUsize,
}

impl StubTool {
  fn new(behavior: Behavior) -> Arc<Self> {
    Arc::new(Self {
      behavior,
      calls: AtomicUsize::new(0),
    })
  }
}

#[async_trait]
impl ToolAdapter for StubTool {
  async fn run(
    &self,
    _invocation: &ToolInvocation,
    workdir: &Path,
    _timeout: Duration,
    cancel: CancellationToken,
  ) -> Result<RunOutcome, ToolError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    match &self.behavior {
      Behavior::Succeed => write_output(workdir).await,
      Behavior::Fail => Ok(RunOutcome {
        exit_code: Some(1),
        output_paths: Vec::new(),
        stderr_tail: "extraction failed".to_string(),
      }),
      Behavior::HangUntilCancelled => {
        cancel.cancelled().await;
        Err(ToolError::Cancelled)
      }
      Behavior::SlowSucceed(delay) => {
        tokio::time::sleep(*delay).await;
        write_output(workdir).await
      }
    }
  }
}

async fn write_output(workdir: &Path) -> Result<RunOutcome, ToolError> {
  let output = workdir.join("timeline.plaso");
  tokio::fs::write(&output, b"storage").await?;
  Ok(RunOutcome {
    exit_code: Some(0),
    output_paths: vec![output],
    stderr_tail: String::new(),
  })
}

struct Harness {
  broker: Arc<MemoryBroker>,
  worker: Worker,
  _dir: tempfile::TempDir,
}

async fn harness(adapter: Arc<dyn ToolAdapter>) -> Harness {
  let dir = tempfile::tempdir().expect("tempdir");
  let store = Arc::new(FsStore::new(dir.path().join("store")));

  let source = dir.path().join("evidence.img");
  tokio::fs::write(&source, b"image").await.expect("write source");
  register_file(store.as_ref(), &source, "evidence.img")
    .await
    .expect("seed store");

  let broker = Arc::new(MemoryBroker::new(Duration::from_secs(60)));
  let reporter = Arc::new(BrokerReporter::new(broker.clone()));
  let executor = Arc::new(TaskExecutor::new(
    store,
    adapter,
    reporter.clone(),
    ExecutorConfig {
      work_root: dir.path().join("work"),
      tool_timeout: Duration::from_secs(30),
      progress_interval: Duration::from_secs(30),
      keep_workdir: false,
      tools: PlasoTools::default(),
    },
  ));
  let worker = Worker::new(
    broker.clone(),
    executor,
    reporter,
    WorkerOptions {
      concurrency: 1,
      poll_interval: Duration::from_millis(50),
      reclaim_interval: Duration::from_secs(30),
      revoke_poll_interval: Duration::from_millis(25),
    },
  );

  Harness {
    broker,
    worker,
    _dir: dir,
  }
}

/// Poll until `predicate` holds or a few seconds pass.
async fn wait_until<F, Fut>(predicate: F)
where
  F: Fn() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  for _ in 0..200 {
    if predicate().await {
      return;
    }
    tokio::time::sleep(Duration::from_millis(25)).await;
  }
  panic!("condition not reached in time");
}

#[tokio::test]
async fn queued_task_is_processed_end_to_end() {
  let harness = harness(StubTool::new(Behavior::Succeed)).await;
  let broker = harness.broker.clone();
  let shutdown = CancellationToken::new();

  broker.push(&Task::new("t1", "evidence.img")).await.expect("push");

  let runner = {
    let shutdown = shutdown.clone();
    let worker = harness.worker;
    tokio::spawn(async move { worker.run(shutdown).await })
  };

  wait_until(|| {
    let broker = broker.clone();
    async move { !broker.results().await.is_empty() }
  })
  .await;
  shutdown.cancel();
  runner.await.expect("join").expect("worker run");

  let results = broker.results().await;
  assert_eq!(results.len(), 1);
  assert_eq!(results[0].task_id, "t1");
  assert_eq!(results[0].attempt, 1);
  assert_eq!(results[0].status, ResultStatus::Succeeded);
  assert_eq!(results[0].output_refs, vec!["t1/1/timeline.plaso".to_string()]);
  assert!(results[0].error.is_none());

  // Exactly one terminal event, after the started event.
  let events = broker.events().await;
  let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
  assert_eq!(terminal.len(), 1);
  assert!(matches!(terminal[0], TaskEvent::Succeeded { .. }));
  assert!(matches!(events.first(), Some(TaskEvent::Started { .. })));

  // The queue is fully drained: nothing pending, nothing leased.
  assert_eq!(broker.queued().await, 0);
  assert_eq!(broker.leased().await, 0);
}

#[tokio::test]
async fn failing_tool_yields_a_failed_result() {
  let harness = harness(StubTool::new(Behavior::Fail)).await;
  let broker = harness.broker.clone();
  let shutdown = CancellationToken::new();

  broker.push(&Task::new("t1", "evidence.img")).await.expect("push");
  let runner = {
    let shutdown = shutdown.clone();
    let worker = harness.worker;
    tokio::spawn(async move { worker.run(shutdown).await })
  };

  wait_until(|| {
    let broker = broker.clone();
    async move { !broker.results().await.is_empty() }
  })
  .await;
  shutdown.cancel();
  runner.await.expect("join").expect("worker run");

  let results = broker.results().await;
  assert_eq!(results[0].status, ResultStatus::Failed);
  assert!(results[0].output_refs.is_empty());
  let error = results[0].error.as_ref().expect("error detail");
  assert_eq!(error.kind, "ToolExecutionError");
  assert_eq!(error.message, "extraction failed");
}

#[tokio::test]
async fn revoking_before_dequeue_prevents_tool_invocation() {
  let stub = StubTool::new(Behavior::Succeed);
  let harness = harness(stub.clone()).await;
  let broker = harness.broker.clone();
  let shutdown = CancellationToken::new();

  broker.revoke("t1").await;
  broker.push(&Task::new("t1", "evidence.img")).await.expect("push");

  let runner = {
    let shutdown = shutdown.clone();
    let worker = harness.worker;
    tokio::spawn(async move { worker.run(shutdown).await })
  };

  wait_until(|| {
    let broker = broker.clone();
    async move { !broker.results().await.is_empty() }
  })
  .await;
  shutdown.cancel();
  runner.await.expect("join").expect("worker run");

  let results = broker.results().await;
  assert_eq!(results[0].status, ResultStatus::Cancelled);
  assert!(results[0].error.is_none());
  assert_eq!(stub.calls.load(Ordering::SeqCst), 0, "tool must not run");
  assert_eq!(broker.leased().await, 0, "delivery is still acknowledged");
}

#[tokio::test]
async fn revoking_mid_flight_cancels_the_attempt() {
  let harness = harness(StubTool::new(Behavior::HangUntilCancelled)).await;
  let broker = harness.broker.clone();
  let shutdown = CancellationToken::new();

  broker.push(&Task::new("t1", "evidence.img")).await.expect("push");
  let runner = {
    let shutdown = shutdown.clone();
    let worker = harness.worker;
    tokio::spawn(async move { worker.run(shutdown).await })
  };

  // Wait until the attempt is running, then revoke it.
  wait_until(|| {
    let broker = broker.clone();
    async move {
      broker
        .events()
        .await
        .iter()
        .any(|e| matches!(e, TaskEvent::Started { .. }))
    }
  })
  .await;
  broker.revoke("t1").await;

  wait_until(|| {
    let broker = broker.clone();
    async move { !broker.results().await.is_empty() }
  })
  .await;
  shutdown.cancel();
  runner.await.expect("join").expect("worker run");

  let results = broker.results().await;
  assert_eq!(results[0].status, ResultStatus::Cancelled);
  let events = broker.events().await;
  let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
  assert_eq!(terminal.len(), 1);
  assert!(matches!(terminal[0], TaskEvent::Cancelled { .. }));
}

#[tokio::test]
async fn shutdown_drains_the_in_flight_task() {
  let harness = harness(StubTool::new(Behavior::SlowSucceed(Duration::from_millis(300)))).await;
  let broker = harness.broker.clone();
  let shutdown = CancellationToken::new();

  broker.push(&Task::new("t1", "evidence.img")).await.expect("push");
  let runner = {
    let shutdown = shutdown.clone();
    let worker = harness.worker;
    tokio::spawn(async move { worker.run(shutdown).await })
  };

  wait_until(|| {
    let broker = broker.clone();
    async move {
      broker
        .events()
        .await
        .iter()
        .any(|e| matches!(e, TaskEvent::Started { .. }))
    }
  })
  .await;

  // Shut down while the tool is still running; the attempt must finish.
  shutdown.cancel();
  runner.await.expect("join").expect("worker run");

  let results = broker.results().await;
  assert_eq!(results.len(), 1);
  assert_eq!(results[0].status, ResultStatus::Succeeded);
  assert_eq!(broker.queued().await, 0);
  assert_eq!(broker.leased().await, 0);
}
