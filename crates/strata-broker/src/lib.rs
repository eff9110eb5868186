//! Strata Broker
//!
//! The queue seam between the orchestrator and workers. A [`Broker`] hands
//! out leased [`Delivery`]s: a pulled task stays invisible to other workers
//! until it is acknowledged, returned, or its visibility timeout expires and
//! [`Broker::reclaim_expired`] makes it re-deliverable. Delivery is
//! at-least-once by design; exactly-once processing is not provided, only
//! idempotent re-processing (each re-delivery carries an incremented attempt
//! number).
//!
//! Two implementations: [`RedisBroker`] for production (list-based reliable
//! queue) and [`MemoryBroker`] for tests and single-process runs.

mod error;
mod memory;
mod redis;
mod reporter;

pub use error::Error;
pub use memory::MemoryBroker;
pub use reporter::BrokerReporter;
pub use self::redis::RedisBroker;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use strata_events::TaskEvent;
use strata_task::{ResultMessage, Task};

/// A leased task delivery.
///
/// The receipt identifies this delivery to the broker for ack/nack; it is
/// meaningless to anything else.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
  pub task: Task,
  /// 1-based attempt number, incremented on every re-delivery.
  pub attempt: u32,
  pub(crate) receipt: String,
}

/// Wire envelope a task travels in, carrying its attempt count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Envelope {
  pub task: Task,
  #[serde(default = "first_attempt")]
  pub attempt: u32,
}

fn first_attempt() -> u32 {
  1
}

/// Message-queue operations the worker runtime needs.
#[async_trait]
pub trait Broker: Send + Sync {
  /// Enqueue a task for its first attempt.
  async fn push(&self, task: &Task) -> Result<(), Error>;

  /// Pull the next task, waiting up to `wait`. `None` means the queue was
  /// empty for the whole wait. The returned delivery is leased.
  async fn pull(&self, wait: Duration) -> Result<Option<Delivery>, Error>;

  /// Acknowledge a delivery, removing it from the queue for good.
  async fn ack(&self, delivery: &Delivery) -> Result<(), Error>;

  /// Return a delivery to the queue for another attempt.
  async fn nack(&self, delivery: &Delivery) -> Result<(), Error>;

  /// Make deliveries whose visibility timeout has expired re-deliverable.
  /// Returns how many were reclaimed.
  async fn reclaim_expired(&self) -> Result<u32, Error>;

  /// Whether the orchestrator has revoked the task.
  async fn is_revoked(&self, task_id: &str) -> Result<bool, Error>;

  /// Publish the terminal result of an attempt.
  async fn publish_result(&self, result: &ResultMessage) -> Result<(), Error>;

  /// Publish a status event.
  async fn publish_event(&self, event: &TaskEvent) -> Result<(), Error>;
}
