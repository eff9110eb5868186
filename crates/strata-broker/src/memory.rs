//! In-memory broker for tests and single-process runs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use strata_events::TaskEvent;
use strata_task::{ResultMessage, Task};

use crate::{Broker, Delivery, Envelope, Error};

struct Leased {
  envelope: Envelope,
  deadline: Instant,
}

#[derive(Default)]
struct State {
  queue: VecDeque<Envelope>,
  leased: HashMap<String, Leased>,
  revoked: HashSet<String>,
  results: Vec<ResultMessage>,
  events: Vec<TaskEvent>,
}

/// Broker backed by process memory.
///
/// Mirrors the redis broker's lease semantics so worker tests exercise the
/// same contract without a server. The collected results and events are
/// inspectable, which is what tests assert against.
pub struct MemoryBroker {
  state: Mutex<State>,
  notify: Notify,
  visibility: Duration,
}

impl MemoryBroker {
  /// Create a broker with the given lease visibility timeout.
  pub fn new(visibility: Duration) -> Self {
    Self {
      state: Mutex::new(State::default()),
      notify: Notify::new(),
      visibility,
    }
  }

  /// Mark a task revoked.
  pub async fn revoke(&self, task_id: &str) {
    self.state.lock().await.revoked.insert(task_id.to_string());
  }

  /// Results published so far.
  pub async fn results(&self) -> Vec<ResultMessage> {
    self.state.lock().await.results.clone()
  }

  /// Events published so far.
  pub async fn events(&self) -> Vec<TaskEvent> {
    self.state.lock().await.events.clone()
  }

  /// Tasks currently waiting in the queue.
  pub async fn queued(&self) -> usize {
    self.state.lock().await.queue.len()
  }

  /// Deliveries currently leased out.
  pub async fn leased(&self) -> usize {
    self.state.lock().await.leased.len()
  }
}

#[async_trait]
impl Broker for MemoryBroker {
  async fn push(&self, task: &Task) -> Result<(), Error> {
    let mut state = self.state.lock().await;
    state.queue.push_back(Envelope {
      task: task.clone(),
      attempt: 1,
    });
    drop(state);
    self.notify.notify_one();
    Ok(())
  }

  async fn pull(&self, wait: Duration) -> Result<Option<Delivery>, Error> {
    let deadline = Instant::now() + wait;
    loop {
      {
        let mut state = self.state.lock().await;
        if let Some(envelope) = state.queue.pop_front() {
          let receipt = uuid::Uuid::new_v4().to_string();
          let delivery = Delivery {
            task: envelope.task.clone(),
            attempt: envelope.attempt,
            receipt: receipt.clone(),
          };
          state.leased.insert(
            receipt,
            Leased {
              envelope,
              deadline: Instant::now() + self.visibility,
            },
          );
          return Ok(Some(delivery));
        }
      }

      let remaining = deadline.saturating_duration_since(Instant::now());
      if remaining.is_zero() {
        return Ok(None);
      }
      let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
    }
  }

  async fn ack(&self, delivery: &Delivery) -> Result<(), Error> {
    let mut state = self.state.lock().await;
    state
      .leased
      .remove(&delivery.receipt)
      .map(|_| ())
      .ok_or_else(|| Error::UnknownReceipt(delivery.receipt.clone()))
  }

  async fn nack(&self, delivery: &Delivery) -> Result<(), Error> {
    let mut state = self.state.lock().await;
    let leased = state
      .leased
      .remove(&delivery.receipt)
      .ok_or_else(|| Error::UnknownReceipt(delivery.receipt.clone()))?;
    state.queue.push_back(Envelope {
      task: leased.envelope.task,
      attempt: leased.envelope.attempt + 1,
    });
    drop(state);
    self.notify.notify_one();
    Ok(())
  }

  async fn reclaim_expired(&self) -> Result<u32, Error> {
    let mut state = self.state.lock().await;
    let now = Instant::now();
    let expired: Vec<String> = state
      .leased
      .iter()
      .filter(|(_, leased)| leased.deadline <= now)
      .map(|(receipt, _)| receipt.clone())
      .collect();

    let mut reclaimed = 0;
    for receipt in expired {
      if let Some(leased) = state.leased.remove(&receipt) {
        state.queue.push_back(Envelope {
          task: leased.envelope.task,
          attempt: leased.envelope.attempt + 1,
        });
        reclaimed += 1;
      }
    }
    if reclaimed > 0 {
      drop(state);
      self.notify.notify_one();
    }
    Ok(reclaimed)
  }

  async fn is_revoked(&self, task_id: &str) -> Result<bool, Error> {
    Ok(self.state.lock().await.revoked.contains(task_id))
  }

  async fn publish_result(&self, result: &ResultMessage) -> Result<(), Error> {
    self.state.lock().await.results.push(result.clone());
    Ok(())
  }

  async fn publish_event(&self, event: &TaskEvent) -> Result<(), Error> {
    self.state.lock().await.events.push(event.clone());
    Ok(())
  }
}
