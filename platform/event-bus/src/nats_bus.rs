//! NATS JetStream implementation of the EventBus trait
//!
//! Each topic is backed by one stream capturing `<topic>.*`; partition `p`
//! is the subject `<topic>.<p>`. A consumer group reads a partition through
//! a durable pull consumer with explicit acks and a single outstanding
//! message, which keeps delivery FIFO per partition. The stream sequence
//! number serves as the record offset.

use crate::{
    partition_for_key, validate_topic_name, Acknowledge, BusError, BusMessage, BusResult,
    Delivery, DeliveryReceipt, EventBus, Headers, OutboundMessage, TopicSpec,
};
use async_nats::jetstream::{self, consumer, stream};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Header carrying the record key (NATS messages have no key of their own)
const KEY_HEADER: &str = "x-record-key";
/// Stream metadata entry holding the partition count
const PARTITIONS_METADATA: &str = "partitions";
/// Partitions given to topics created implicitly by a publish
const DEFAULT_PARTITIONS: u32 = 1;
/// Redelivery timeout for unacknowledged messages: the default retry
/// policy's 30 s delay cap plus 30 s for the handler
pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(60);

/// EventBus implementation using NATS JetStream
///
/// This is the production implementation that connects to a NATS server.
/// It wraps an `async_nats::Client` and implements the `EventBus` trait.
/// Replication factor maps onto stream replicas; the minimum in-sync replica
/// setting has no JetStream counterpart and is not applied.
///
/// A consumer holds a retry record unacknowledged until its delay has passed
/// and the handler returned, so `ack_wait` must exceed the largest retry delay
/// plus handler time or JetStream hands the record out a second time. The
/// setting applies when a durable consumer is created; existing durables keep
/// theirs.
///
/// # Example
/// ```rust,no_run
/// use event_bus::{EventBus, NatsBus, OutboundMessage, TopicSpec};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let nats_client = async_nats::connect("nats://localhost:4222").await?;
/// let bus = NatsBus::new(nats_client);
///
/// bus.ensure_topic(&TopicSpec::new("product-created-events-topic", 3)).await?;
/// bus.publish(OutboundMessage::new("product-created-events-topic", "key", b"{}".to_vec()))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
    partitions: Arc<Mutex<HashMap<String, u32>>>,
    ack_wait: Duration,
}

impl NatsBus {
    /// Create a new NatsBus from an existing NATS client
    ///
    /// # Arguments
    /// * `client` - An already-connected `async_nats::Client`
    pub fn new(client: Client) -> Self {
        Self {
            jetstream: jetstream::new(client.clone()),
            client,
            partitions: Arc::new(Mutex::new(HashMap::new())),
            ack_wait: DEFAULT_ACK_WAIT,
        }
    }

    /// Redelivery timeout for durable consumers created by this bus
    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn ack_wait(&self) -> Duration {
        self.ack_wait
    }

    /// Connect to a NATS server and wrap the client
    pub async fn connect(url: &str) -> BusResult<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;
        Ok(Self::new(client))
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn cached_partitions(&self, topic: &str) -> Option<u32> {
        self.partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .copied()
    }

    fn remember_partitions(&self, topic: &str, partitions: u32) {
        self.partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string(), partitions);
    }

    async fn get_stream(&self, topic: &str) -> BusResult<stream::Stream> {
        self.jetstream
            .get_stream(stream_name(topic))
            .await
            .map_err(|_| BusError::UnknownTopic(topic.to_string()))
    }
}

/// Durable pull consumer reading one partition for a group
fn pull_config(
    topic: &str,
    group: &str,
    partition: u32,
    ack_wait: Duration,
) -> consumer::pull::Config {
    consumer::pull::Config {
        durable_name: Some(durable_name(group, partition)),
        filter_subject: partition_subject(topic, partition),
        ack_policy: consumer::AckPolicy::Explicit,
        ack_wait,
        deliver_policy: consumer::DeliverPolicy::All,
        max_ack_pending: 1,
        ..Default::default()
    }
}

/// JetStream stream name for a topic
fn stream_name(topic: &str) -> String {
    topic
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Durable consumer name for a (group, partition) pair
fn durable_name(group: &str, partition: u32) -> String {
    let group: String = group
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{group}-p{partition}")
}

fn partition_subject(topic: &str, partition: u32) -> String {
    format!("{topic}.{partition}")
}

fn to_header_map(key: &str, headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(name.as_str(), value.as_str());
    }
    map.insert(KEY_HEADER, key);
    map
}

fn from_header_map(map: Option<&HeaderMap>) -> (String, Headers) {
    let mut headers = Headers::new();
    if let Some(map) = map {
        for (name, values) in map.iter() {
            // Take the first value for each header
            if let Some(value) = values.first() {
                headers.insert(name.to_string(), value.to_string());
            }
        }
    }
    let key = headers.remove(KEY_HEADER).unwrap_or_default();
    (key, headers)
}

struct NatsAck {
    acker: jetstream::message::Acker,
}

#[async_trait]
impl Acknowledge for NatsAck {
    async fn ack(&self) -> BusResult<()> {
        self.acker
            .ack()
            .await
            .map_err(|e| BusError::AckError(e.to_string()))
    }
}

fn into_delivery(topic: &str, partition: u32, message: jetstream::Message) -> BusResult<Delivery> {
    let offset = message
        .info()
        .map_err(|e| BusError::InternalError(format!("missing JetStream metadata: {e}")))?
        .stream_sequence;
    let (message, acker) = message.split();
    let (key, headers) = from_header_map(message.headers.as_ref());

    Ok(Delivery::new(
        BusMessage {
            topic: topic.to_string(),
            partition,
            offset,
            key,
            payload: message.payload.to_vec(),
            headers,
        },
        Box::new(NatsAck { acker }),
    ))
}

#[async_trait]
impl EventBus for NatsBus {
    async fn ensure_topic(&self, spec: &TopicSpec) -> BusResult<()> {
        spec.validate()?;

        if let Ok(mut existing) = self.get_stream(&spec.name).await {
            let info = existing
                .info()
                .await
                .map_err(|e| BusError::ConnectionError(e.to_string()))?;
            let partitions = info
                .config
                .metadata
                .get(PARTITIONS_METADATA)
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(spec.partitions);
            if partitions != spec.partitions {
                tracing::warn!(
                    topic = %spec.name,
                    existing = partitions,
                    requested = spec.partitions,
                    "Topic already exists with a different partition count"
                );
            }
            self.remember_partitions(&spec.name, partitions);
            return Ok(());
        }

        let config = stream::Config {
            name: stream_name(&spec.name),
            subjects: vec![format!("{}.*", spec.name)],
            num_replicas: spec.replication_factor as usize,
            metadata: HashMap::from([(
                PARTITIONS_METADATA.to_string(),
                spec.partitions.to_string(),
            )]),
            ..Default::default()
        };
        self.jetstream
            .create_stream(config)
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        tracing::info!(
            topic = %spec.name,
            partitions = spec.partitions,
            replicas = spec.replication_factor,
            "Created JetStream stream for topic"
        );

        self.remember_partitions(&spec.name, spec.partitions);
        Ok(())
    }

    async fn partition_count(&self, topic: &str) -> BusResult<u32> {
        if let Some(partitions) = self.cached_partitions(topic) {
            return Ok(partitions);
        }

        let stream = self.get_stream(topic).await?;
        let partitions = stream
            .cached_info()
            .config
            .metadata
            .get(PARTITIONS_METADATA)
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| {
                BusError::InternalError(format!("{topic}: stream has no partition metadata"))
            })?;

        self.remember_partitions(topic, partitions);
        Ok(partitions)
    }

    async fn publish(&self, message: OutboundMessage) -> BusResult<DeliveryReceipt> {
        validate_topic_name(&message.topic)?;

        let partitions = match self.partition_count(&message.topic).await {
            Ok(partitions) => partitions,
            Err(BusError::UnknownTopic(_)) => {
                self.ensure_topic(&TopicSpec::new(message.topic.clone(), DEFAULT_PARTITIONS))
                    .await?;
                DEFAULT_PARTITIONS
            }
            Err(e) => return Err(e),
        };

        let partition = partition_for_key(&message.key, partitions);
        let headers = to_header_map(&message.key, &message.headers);

        let ack = self
            .jetstream
            .publish_with_headers(
                partition_subject(&message.topic, partition),
                headers,
                message.payload.into(),
            )
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?;

        Ok(DeliveryReceipt {
            topic: message.topic,
            partition,
            offset: ack.sequence,
        })
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> BusResult<BoxStream<'static, Delivery>> {
        let partitions = self.partition_count(topic).await?;
        if partition >= partitions {
            return Err(BusError::SubscribeError(format!(
                "{topic} has no partition {partition}"
            )));
        }

        let stream = self.get_stream(topic).await?;
        let durable = durable_name(group, partition);
        let consumer: consumer::PullConsumer = stream
            .get_or_create_consumer(
                &durable,
                pull_config(topic, group, partition, self.ack_wait),
            )
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let topic = topic.to_string();
        let stream = async_stream::stream! {
            while let Some(result) = messages.next().await {
                match result {
                    Ok(message) => match into_delivery(&topic, partition, message) {
                        Ok(delivery) => yield delivery,
                        Err(e) => tracing::warn!(topic = %topic, partition, error = %e, "Skipping JetStream message"),
                    },
                    Err(e) => {
                        tracing::warn!(topic = %topic, partition, error = %e, "JetStream pull failed");
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_name() {
        assert_eq!(
            stream_name("product-created-events-topic"),
            "PRODUCT_CREATED_EVENTS_TOPIC"
        );
        assert_eq!(
            stream_name("product-created-events-topic.DLT"),
            "PRODUCT_CREATED_EVENTS_TOPIC_DLT"
        );
    }

    #[test]
    fn test_durable_name() {
        assert_eq!(
            durable_name("product-created-events", 2),
            "product-created-events-p2"
        );
        assert_eq!(durable_name("a.b", 0), "a_b-p0");
    }

    #[test]
    fn test_pull_config_covers_retry_wait() {
        let config = pull_config(
            "product-created-events-topic-retry-30000",
            "product-created-events",
            1,
            Duration::from_secs(90),
        );

        assert_eq!(config.ack_wait, Duration::from_secs(90));
        assert_eq!(config.durable_name.as_deref(), Some("product-created-events-p1"));
        assert_eq!(config.filter_subject, "product-created-events-topic-retry-30000.1");
        assert_eq!(config.max_ack_pending, 1);
        assert!(matches!(config.ack_policy, consumer::AckPolicy::Explicit));
    }

    #[test]
    fn test_default_ack_wait_exceeds_default_retry_delay() {
        let policy = crate::RetryPolicy::default();
        assert!(DEFAULT_ACK_WAIT > policy.max_delay);
    }

    #[test]
    fn test_header_mapping_carries_key() {
        let mut headers = Headers::new();
        headers.insert("x-attempt".to_string(), "2".to_string());

        let map = to_header_map("key-1", &headers);
        let (key, restored) = from_header_map(Some(&map));

        assert_eq!(key, "key-1");
        assert_eq!(restored, headers);
    }

    // Note: This test requires a running NATS server with JetStream enabled
    // For CI, use InMemoryBus tests instead
    // For manual testing: docker run -p 4222:4222 nats:2.10-alpine -js

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_nats_bus_publish_subscribe() {
        let bus = NatsBus::connect("nats://localhost:4222")
            .await
            .expect("NATS server must be running on localhost:4222");

        let topic = format!("test-nats-{}", uuid::Uuid::new_v4());
        bus.ensure_topic(&TopicSpec::new(topic.clone(), 3)).await.unwrap();

        let payload = b"test message".to_vec();
        let receipt = bus
            .publish(OutboundMessage::new(topic.clone(), "key-1", payload.clone()))
            .await
            .unwrap();
        assert_eq!(receipt.partition, partition_for_key("key-1", 3));

        let mut stream = bus
            .subscribe(&topic, "test-group", receipt.partition)
            .await
            .unwrap();
        let delivery = tokio::time::timeout(std::time::Duration::from_secs(2), stream.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended");

        assert_eq!(delivery.message.key, "key-1");
        assert_eq!(delivery.message.payload, payload);
        assert_eq!(delivery.message.offset, receipt.offset);
        delivery.ack().await.unwrap();
    }
}
