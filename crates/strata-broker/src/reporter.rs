//! Broker-backed event reporter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use strata_events::{Reporter, TaskEvent};

use crate::Broker;

/// Publishes task events through the shared broker connection.
///
/// Reporting is best-effort: a publish failure is logged and the attempt
/// carries on. Consumers already have to deduplicate on
/// `(task_id, attempt)`, so a lost progress event costs nothing durable.
pub struct BrokerReporter {
  broker: Arc<dyn Broker>,
}

impl BrokerReporter {
  pub fn new(broker: Arc<dyn Broker>) -> Self {
    Self { broker }
  }
}

#[async_trait]
impl Reporter for BrokerReporter {
  async fn report(&self, event: TaskEvent) {
    if let Err(error) = self.broker.publish_event(&event).await {
      warn!(
        task_id = event.task_id(),
        attempt = event.attempt(),
        error = %error,
        "failed to publish task event"
      );
    }
  }
}
