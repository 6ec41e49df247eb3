//! # EventBus Abstraction
//!
//! A partitioned, acknowledged event bus shared by the producer and consumer
//! services.
//!
//! ## Delivery Model
//!
//! - Topics are split into partitions. A record's key picks its partition,
//!   so records sharing a key are delivered in publish order.
//! - Within a consumer group a partition is assigned to one subscription at
//!   a time. Deliveries must be acknowledged; anything left unacknowledged
//!   is redelivered to the group's next subscription (at-least-once).
//! - No ordering is promised across different keys.
//!
//! ## Implementations
//!
//! - **NatsBus**: Production implementation on NATS JetStream
//! - **InMemoryBus**: Test/dev implementation with in-process partition logs
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{EventBus, InMemoryBus, OutboundMessage, TopicSpec};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//! bus.ensure_topic(&TopicSpec::new("product-created-events-topic", 3)).await?;
//!
//! let receipt = bus
//!     .publish(OutboundMessage::new(
//!         "product-created-events-topic",
//!         "product-1",
//!         b"{}".to_vec(),
//!     ))
//!     .await?;
//!
//! let mut stream = bus
//!     .subscribe("product-created-events-topic", "notifications", receipt.partition)
//!     .await?;
//! if let Some(delivery) = stream.next().await {
//!     delivery.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod consumer_retry;
mod envelope;
pub mod headers;
mod inmemory_bus;
mod nats_bus;
mod partitioner;
pub mod publisher;
pub mod retrying_consumer;

pub use consumer_retry::{RetryDecision, RetryPolicy};
pub use envelope::{validate_envelope, EventEnvelope};
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::{NatsBus, DEFAULT_ACK_WAIT};
pub use partitioner::{murmur2, partition_for_key};
pub use publisher::{PublishError, PublishMode, Publisher};
pub use retrying_consumer::{
    ConsumerHandle, DeadLetterReason, DeliveryOutcome, DeliveryReport, DeliveryState,
    EventHandler, ProcessingError, RetryExhausted, RetryingConsumer,
};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;

/// Record headers (string key/value metadata carried next to the payload)
pub type Headers = HashMap<String, String>;

/// Provisioning parameters for a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u16,
    pub min_insync_replicas: u16,
}

impl TopicSpec {
    /// Single-replica topic with the given partition count
    pub fn new(name: impl Into<String>, partitions: u32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor: 1,
            min_insync_replicas: 1,
        }
    }

    /// Set replication factor and minimum in-sync replicas
    pub fn with_replication(mut self, replication_factor: u16, min_insync_replicas: u16) -> Self {
        self.replication_factor = replication_factor;
        self.min_insync_replicas = min_insync_replicas;
        self
    }

    /// Same shape under a different name (used for retry and dead-letter topics)
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub(crate) fn validate(&self) -> BusResult<()> {
        validate_topic_name(&self.name)?;
        if self.partitions == 0 {
            return Err(BusError::InvalidTopic(format!(
                "{}: partition count must be at least 1",
                self.name
            )));
        }
        if self.min_insync_replicas > self.replication_factor {
            return Err(BusError::InvalidTopic(format!(
                "{}: min in-sync replicas ({}) exceeds replication factor ({})",
                self.name, self.min_insync_replicas, self.replication_factor
            )));
        }
        Ok(())
    }
}

/// A record handed to the broker for publication
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    /// Partition key; records sharing a key share a partition
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
            headers: Headers::new(),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A record as stored by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub partition: u32,
    /// Position within the partition
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

impl BusMessage {
    /// Look up a header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Broker acknowledgment of a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

impl fmt::Display for DeliveryReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Topic={}, Partition={}, Offset={}",
            self.topic, self.partition, self.offset
        )
    }
}

/// Commits a single delivery back to the broker
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> BusResult<()>;
}

/// A record received through a subscription, together with its ack handle
pub struct Delivery {
    pub message: BusMessage,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(message: BusMessage, acker: Box<dyn Acknowledge>) -> Self {
        Self { message, acker }
    }

    /// Acknowledge the record so the consumer group does not receive it again
    pub async fn ack(&self) -> BusResult<()> {
        self.acker.ack().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe: {0}")]
    SubscribeError(String),

    #[error("failed to acknowledge message: {0}")]
    AckError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core partitioned event bus abstraction
///
/// Implementations must be safe to share across tasks: publishes from
/// concurrent callers go through the same client connection.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Create the topic if it does not exist yet (idempotent)
    async fn ensure_topic(&self, spec: &TopicSpec) -> BusResult<()>;

    /// Number of partitions of a provisioned topic
    async fn partition_count(&self, topic: &str) -> BusResult<u32>;

    /// Publish a record; resolves once the broker has acknowledged the write
    ///
    /// # Returns
    /// * `Ok(DeliveryReceipt)` with the partition and offset assigned
    /// * `Err(BusError)` if the broker rejected or failed the write
    async fn publish(&self, message: OutboundMessage) -> BusResult<DeliveryReceipt>;

    /// Consume one partition of a topic on behalf of a consumer group
    ///
    /// Deliveries start at the group's committed position and arrive in
    /// partition order. A partition can have at most one live subscription
    /// per group.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> BusResult<BoxStream<'static, Delivery>>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}

/// Topic names: non-empty, ASCII alphanumerics plus `.`, `_` and `-`
pub(crate) fn validate_topic_name(name: &str) -> BusResult<()> {
    if name.is_empty() {
        return Err(BusError::InvalidTopic("topic name cannot be empty".to_string()));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(BusError::InvalidTopic(format!(
            "{name}: illegal character {c:?}"
        )));
    }
    Ok(())
}
