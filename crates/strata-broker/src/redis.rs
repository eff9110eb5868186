//! Redis-backed broker.
//!
//! The reliable-queue pattern over plain lists: `BRPOPLPUSH` atomically moves
//! a payload from the pending list to a processing list, where it stays until
//! acked (`LREM`) or returned. Lease deadlines live in a hash keyed by the
//! raw payload; [`RedisBroker::reclaim_expired`] moves overdue payloads back
//! to the pending list with an incremented attempt count.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::warn;

use strata_events::TaskEvent;
use strata_task::{ResultMessage, Task};

use crate::{Broker, Delivery, Envelope, Error};

/// Redis key set, namespaced by a configurable prefix.
#[derive(Debug, Clone)]
struct Keys {
  pending: String,
  processing: String,
  leases: String,
  revoked: String,
  results: String,
  events: String,
}

impl Keys {
  fn new(prefix: &str) -> Self {
    Self {
      pending: format!("{prefix}:tasks"),
      processing: format!("{prefix}:tasks:processing"),
      leases: format!("{prefix}:tasks:leases"),
      revoked: format!("{prefix}:tasks:revoked"),
      results: format!("{prefix}:results"),
      events: format!("{prefix}:events"),
    }
  }
}

/// Broker backed by a redis server.
pub struct RedisBroker {
  connection: ConnectionManager,
  keys: Keys,
  visibility: Duration,
}

impl RedisBroker {
  /// Connect to the broker.
  ///
  /// # Arguments
  /// * `url` - redis connection URL
  /// * `prefix` - key namespace, shared by all workers on one pipeline
  /// * `visibility` - lease timeout before an unacked delivery is reclaimable
  pub async fn connect(url: &str, prefix: &str, visibility: Duration) -> Result<Self, Error> {
    let client = Client::open(url)?;
    let connection = client.get_tokio_connection_manager().await?;
    Ok(Self {
      connection,
      keys: Keys::new(prefix),
      visibility,
    })
  }

  fn lease_deadline(&self) -> u64 {
    let now = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default();
    (now + self.visibility).as_millis() as u64
  }

  /// Drop a payload from the processing list and its lease entry.
  async fn release(&self, payload: &str) -> Result<(), Error> {
    let mut connection = self.connection.clone();
    let removed: u32 = connection.lrem(&self.keys.processing, 1, payload).await?;
    connection.hdel::<_, _, ()>(&self.keys.leases, payload).await?;
    if removed == 0 {
      return Err(Error::UnknownReceipt(payload.to_string()));
    }
    Ok(())
  }

  async fn requeue(&self, envelope: Envelope) -> Result<(), Error> {
    let next = Envelope {
      task: envelope.task,
      attempt: envelope.attempt + 1,
    };
    let payload = serde_json::to_string(&next)?;
    let mut connection = self.connection.clone();
    connection.lpush::<_, _, ()>(&self.keys.pending, payload).await?;
    Ok(())
  }

  /// Mark a task revoked so workers skip or cancel it.
  pub async fn revoke(&self, task_id: &str) -> Result<(), Error> {
    let mut connection = self.connection.clone();
    connection.sadd::<_, _, ()>(&self.keys.revoked, task_id).await?;
    Ok(())
  }
}

#[async_trait]
impl Broker for RedisBroker {
  async fn push(&self, task: &Task) -> Result<(), Error> {
    let payload = serde_json::to_string(&Envelope {
      task: task.clone(),
      attempt: 1,
    })?;
    let mut connection = self.connection.clone();
    connection.lpush::<_, _, ()>(&self.keys.pending, payload).await?;
    Ok(())
  }

  async fn pull(&self, wait: Duration) -> Result<Option<Delivery>, Error> {
    let mut connection = self.connection.clone();
    // BRPOPLPUSH only takes whole seconds; sub-second waits round up so a
    // zero timeout (block forever) is never sent by accident.
    let wait_secs = wait.as_secs().max(1) as usize;
    let payload: Option<String> = redis::cmd("BRPOPLPUSH")
      .arg(&self.keys.pending)
      .arg(&self.keys.processing)
      .arg(wait_secs)
      .query_async(&mut connection)
      .await?;

    let Some(payload) = payload else {
      return Ok(None);
    };

    let envelope: Envelope = match serde_json::from_str(&payload) {
      Ok(envelope) => envelope,
      Err(error) => {
        // A payload that cannot be parsed would be re-delivered forever;
        // drop it and surface the error once.
        warn!(error = %error, "dropping malformed payload from queue");
        connection.lrem::<_, _, ()>(&self.keys.processing, 1, &payload).await?;
        return Err(Error::Payload(error));
      }
    };

    connection
      .hset::<_, _, _, ()>(&self.keys.leases, &payload, self.lease_deadline())
      .await?;

    Ok(Some(Delivery {
      task: envelope.task,
      attempt: envelope.attempt,
      receipt: payload,
    }))
  }

  async fn ack(&self, delivery: &Delivery) -> Result<(), Error> {
    self.release(&delivery.receipt).await
  }

  async fn nack(&self, delivery: &Delivery) -> Result<(), Error> {
    self.release(&delivery.receipt).await?;
    let envelope: Envelope = serde_json::from_str(&delivery.receipt)?;
    self.requeue(envelope).await
  }

  async fn reclaim_expired(&self) -> Result<u32, Error> {
    let mut connection = self.connection.clone();
    let leases: HashMap<String, u64> = connection.hgetall(&self.keys.leases).await?;
    let now = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_millis() as u64;

    let mut reclaimed = 0;
    for (payload, deadline) in leases {
      if deadline > now {
        continue;
      }
      // Only the holder of the processing entry may requeue; LREM returning
      // zero means another worker already reclaimed it.
      let removed: u32 = connection.lrem(&self.keys.processing, 1, &payload).await?;
      connection.hdel::<_, _, ()>(&self.keys.leases, &payload).await?;
      if removed == 0 {
        continue;
      }
      match serde_json::from_str::<Envelope>(&payload) {
        Ok(envelope) => {
          self.requeue(envelope).await?;
          reclaimed += 1;
        }
        Err(error) => warn!(error = %error, "dropping malformed leased payload"),
      }
    }
    Ok(reclaimed)
  }

  async fn is_revoked(&self, task_id: &str) -> Result<bool, Error> {
    let mut connection = self.connection.clone();
    Ok(connection.sismember(&self.keys.revoked, task_id).await?)
  }

  async fn publish_result(&self, result: &ResultMessage) -> Result<(), Error> {
    let payload = serde_json::to_string(result)?;
    let mut connection = self.connection.clone();
    connection.lpush::<_, _, ()>(&self.keys.results, payload).await?;
    Ok(())
  }

  async fn publish_event(&self, event: &TaskEvent) -> Result<(), Error> {
    let payload = serde_json::to_string(event)?;
    let mut connection = self.connection.clone();
    connection.lpush::<_, _, ()>(&self.keys.events, payload).await?;
    Ok(())
  }
}
