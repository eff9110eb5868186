//! Worker runtime implementation.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use strata_broker::{Broker, Delivery};
use strata_events::{Reporter, TaskEvent};
use strata_executor::TaskExecutor;
use strata_task::{ExecutionResult, TaskError};

/// Tuning knobs for the worker runtime.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
  /// Number of concurrent consume loops.
  pub concurrency: usize,
  /// How long one queue pull blocks before trying again.
  pub poll_interval: Duration,
  /// How often expired leases are swept back onto the queue.
  pub reclaim_interval: Duration,
  /// How often an in-flight task checks for revocation.
  pub revoke_poll_interval: Duration,
}

impl Default for WorkerOptions {
  fn default() -> Self {
    Self {
      concurrency: 1,
      poll_interval: Duration::from_secs(5),
      reclaim_interval: Duration::from_secs(60),
      revoke_poll_interval: Duration::from_secs(2),
    }
  }
}

/// Errors that stop the worker runtime.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
  /// A consume loop panicked; the runtime shuts down rather than limp on
  /// with fewer loops than configured.
  #[error("consumer loop failed: {0}")]
  Consumer(String),
}

/// The worker runtime.
///
/// Construct once at startup with explicit collaborators; there is no
/// ambient state, so tests run isolated instances side by side.
pub struct Worker {
  broker: Arc<dyn Broker>,
  executor: Arc<TaskExecutor>,
  reporter: Arc<dyn Reporter>,
  options: WorkerOptions,
}

impl Worker {
  /// Create a new worker runtime.
  pub fn new(
    broker: Arc<dyn Broker>,
    executor: Arc<TaskExecutor>,
    reporter: Arc<dyn Reporter>,
    options: WorkerOptions,
  ) -> Self {
    Self {
      broker,
      executor,
      reporter,
      options,
    }
  }

  /// Run until `shutdown` is cancelled, draining in-flight tasks.
  pub async fn run(&self, shutdown: CancellationToken) -> Result<(), WorkerError> {
    info!(concurrency = self.options.concurrency, "worker started");

    let mut loops = JoinSet::new();
    for slot in 0..self.options.concurrency {
      let consumer = Consumer {
        broker: self.broker.clone(),
        executor: self.executor.clone(),
        reporter: self.reporter.clone(),
        options: self.options.clone(),
        shutdown: shutdown.clone(),
        slot,
      };
      loops.spawn(async move { consumer.run().await });
    }
    loops.spawn(reclaim_loop(
      self.broker.clone(),
      self.options.reclaim_interval,
      shutdown.clone(),
    ));

    let mut failure = None;
    while let Some(joined) = loops.join_next().await {
      if let Err(join_error) = joined {
        error!(error = %join_error, "worker loop panicked");
        shutdown.cancel();
        failure.get_or_insert_with(|| WorkerError::Consumer(join_error.to_string()));
      }
    }

    info!("worker stopped");
    match failure {
      Some(error) => Err(error),
      None => Ok(()),
    }
  }
}

struct Consumer {
  broker: Arc<dyn Broker>,
  executor: Arc<TaskExecutor>,
  reporter: Arc<dyn Reporter>,
  options: WorkerOptions,
  shutdown: CancellationToken,
  slot: usize,
}

impl Consumer {
  async fn run(self) {
    loop {
      let pulled = tokio::select! {
        _ = self.shutdown.cancelled() => break,
        pulled = self.broker.pull(self.options.poll_interval) => pulled,
      };

      match pulled {
        Ok(Some(delivery)) => self.process(delivery).await,
        Ok(None) => {}
        Err(error) => {
          // Broker trouble is transient by assumption; back off and retry.
          error!(error = %error, "failed to pull from broker");
          tokio::select! {
            _ = self.shutdown.cancelled() => break,
            _ = tokio::time::sleep(self.options.poll_interval) => {}
          }
        }
      }
    }
    debug!(slot = self.slot, "consumer loop stopped");
  }

  async fn process(&self, delivery: Delivery) {
    let task = &delivery.task;

    // Revoked before we even start: resolve as cancelled without touching
    // the tool or the working directory.
    match self.broker.is_revoked(&task.task_id).await {
      Ok(true) => {
        info!(task_id = %task.task_id, attempt = delivery.attempt, "task revoked before start");
        let result =
          ExecutionResult::from_error(task.task_id.clone(), delivery.attempt, TaskError::Cancelled);
        self.finish(&delivery, result).await;
        return;
      }
      Ok(false) => {}
      Err(error) => {
        // Failing open here only costs a cancelled task some work.
        warn!(error = %error, "revocation check failed, proceeding");
      }
    }

    // The attempt token is independent of the shutdown token: shutdown
    // drains in-flight work, only revocation aborts it.
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(watch_revocation(
      self.broker.clone(),
      task.task_id.clone(),
      cancel.clone(),
      self.options.revoke_poll_interval,
    ));

    let result = self
      .executor
      .execute(task, delivery.attempt, cancel.clone())
      .await;

    cancel.cancel();
    let _ = watcher.await;

    self.finish(&delivery, result).await;
  }

  /// Publish the terminal event and result, then acknowledge.
  ///
  /// Publish-before-ack keeps the at-least-once guarantee: a crash in
  /// between re-delivers the task instead of losing its result.
  async fn finish(&self, delivery: &Delivery, result: ExecutionResult) {
    self.reporter.report(TaskEvent::from_result(&result)).await;

    if let Err(error) = self.broker.publish_result(&result.to_message()).await {
      error!(
        task_id = %result.task_id,
        attempt = result.attempt,
        error = %error,
        "failed to publish result"
      );
    }
    if let Err(error) = self.broker.ack(delivery).await {
      warn!(
        task_id = %result.task_id,
        attempt = result.attempt,
        error = %error,
        "failed to acknowledge delivery, task may be re-delivered"
      );
    }
  }
}

/// Cancel the attempt token if the task gets revoked mid-flight.
async fn watch_revocation(
  broker: Arc<dyn Broker>,
  task_id: String,
  cancel: CancellationToken,
  poll: Duration,
) {
  loop {
    tokio::select! {
      _ = cancel.cancelled() => return,
      _ = tokio::time::sleep(poll) => {}
    }
    match broker.is_revoked(&task_id).await {
      Ok(true) => {
        info!(task_id = %task_id, "task revoked during execution");
        cancel.cancel();
        return;
      }
      Ok(false) => {}
      Err(error) => warn!(error = %error, "revocation poll failed"),
    }
  }
}

/// Periodically return expired leases to the queue.
async fn reclaim_loop(broker: Arc<dyn Broker>, interval: Duration, shutdown: CancellationToken) {
  loop {
    tokio::select! {
      _ = shutdown.cancelled() => return,
      _ = tokio::time::sleep(interval) => {}
    }
    match broker.reclaim_expired().await {
      Ok(0) => {}
      Ok(reclaimed) => info!(reclaimed, "returned expired leases to the queue"),
      Err(error) => warn!(error = %error, "lease reclaim failed"),
    }
  }
}
