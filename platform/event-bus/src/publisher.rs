//! Dual-mode event publisher
//!
//! One publisher, two contracts:
//!
//! - **sync**: the caller waits for the broker acknowledgment, bounded by an
//!   explicit timeout. Timeouts are reported separately from broker failures.
//! - **async**: the call returns at once; the outcome is handed to a
//!   completion callback that runs exactly once on a background task.
//!
//! Neither mode retries. A failed publish is surfaced (sync) or logged (async).

use crate::{
    validate_envelope, BusError, DeliveryReceipt, EventBus, EventEnvelope, OutboundMessage,
};
use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Publish failure taxonomy
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The broker did not acknowledge the write within the deadline
    #[error("publish to {topic} timed out after {}ms", timeout.as_millis())]
    Timeout { topic: String, timeout: Duration },

    /// The broker rejected or failed the write
    #[error("publish failed: {0}")]
    Failure(#[from] BusError),
}

/// How a publish waits for the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Block until acknowledged or the timeout elapses
    Sync { timeout: Duration },
    /// Return immediately; completion is observed via callback
    Async,
}

impl fmt::Display for PublishMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishMode::Sync { .. } => write!(f, "synchronously"),
            PublishMode::Async => write!(f, "asynchronously"),
        }
    }
}

/// Publishes event envelopes through a shared broker client
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn EventBus>,
}

impl Publisher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    /// Publish and wait for the broker acknowledgment
    ///
    /// # Errors
    /// * `PublishError::Timeout` if no acknowledgment arrived within `timeout`
    /// * `PublishError::Failure` for any broker-reported error
    pub async fn publish_sync<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope<T>,
        timeout: Duration,
    ) -> Result<DeliveryReceipt, PublishError> {
        let message = build_message(topic, key, envelope)?;

        let receipt = match tokio::time::timeout(timeout, self.bus.publish(message)).await {
            Ok(result) => result?,
            Err(_) => {
                error!(
                    topic,
                    key,
                    event_id = %envelope.event_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for broker acknowledgment"
                );
                return Err(PublishError::Timeout {
                    topic: topic.to_string(),
                    timeout,
                });
            }
        };

        log_sent(PublishMode::Sync { timeout }, &receipt);
        Ok(receipt)
    }

    /// Publish without waiting; `on_complete` receives the outcome later
    ///
    /// The callback is invoked exactly once, on a background task, after this
    /// call has returned. A panicking callback is caught and logged.
    pub fn publish_async<T, F>(&self, topic: &str, key: &str, envelope: &EventEnvelope<T>, on_complete: F)
    where
        T: Serialize,
        F: FnOnce(Result<DeliveryReceipt, PublishError>) + Send + 'static,
    {
        // Envelope encoding happens on the caller's side so the body is fixed now
        let prepared = build_message(topic, key, envelope);
        let bus = self.bus.clone();
        let topic = topic.to_string();

        tokio::spawn(async move {
            let result = match prepared {
                Ok(message) => bus.publish(message).await.map_err(PublishError::from),
                Err(e) => Err(e),
            };

            match &result {
                Ok(receipt) => log_sent(PublishMode::Async, receipt),
                Err(e) => error!(topic = %topic, error = %e, "Failed to send message asynchronously"),
            }

            if std::panic::catch_unwind(AssertUnwindSafe(|| on_complete(result))).is_err() {
                error!(topic = %topic, "Publish completion callback panicked");
            }
        });
    }

    /// Publish in the given mode
    ///
    /// Sync mode returns the receipt; async mode returns `None` at once and
    /// only logs the eventual outcome.
    pub async fn publish<T: Serialize>(
        &self,
        mode: PublishMode,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope<T>,
    ) -> Result<Option<DeliveryReceipt>, PublishError> {
        match mode {
            PublishMode::Sync { timeout } => {
                Ok(Some(self.publish_sync(topic, key, envelope, timeout).await?))
            }
            PublishMode::Async => {
                self.publish_async(topic, key, envelope, |_| {});
                Ok(None)
            }
        }
    }
}

fn build_message<T: Serialize>(
    topic: &str,
    key: &str,
    envelope: &EventEnvelope<T>,
) -> Result<OutboundMessage, PublishError> {
    validate_envelope(envelope)?;
    if key.trim().is_empty() {
        return Err(BusError::InvalidEnvelope("partition key cannot be empty".to_string()).into());
    }

    Ok(OutboundMessage::new(topic, key, envelope.payload_bytes()?).with_headers(envelope.to_headers()))
}

fn log_sent(mode: PublishMode, receipt: &DeliveryReceipt) {
    info!(
        topic = %receipt.topic,
        partition = receipt.partition,
        offset = receipt.offset,
        "Message sent {} successfully",
        mode
    );
}
