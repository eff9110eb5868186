//! Broker errors.

/// Errors from broker operations.
///
/// Broker errors are transient by assumption: the worker runtime logs them
/// and keeps consuming, it never exits over one.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// Could not reach or talk to the backend.
  #[error("broker backend error: {0}")]
  Backend(#[from] redis::RedisError),

  /// A queued payload was not a valid task envelope. The payload is dropped
  /// from the queue so it cannot wedge the consumer.
  #[error("malformed task payload: {0}")]
  Payload(#[from] serde_json::Error),

  /// The delivery's lease is no longer held (already acked or reclaimed).
  #[error("unknown delivery receipt: {0}")]
  UnknownReceipt(String),
}
