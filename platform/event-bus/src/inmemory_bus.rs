//! In-memory implementation of the EventBus trait for testing and development

use crate::{
    partition_for_key, validate_topic_name, Acknowledge, BusError, BusMessage, BusResult,
    Delivery, DeliveryReceipt, EventBus, OutboundMessage, TopicSpec,
};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Partitions given to topics created implicitly by a publish
const DEFAULT_PARTITIONS: u32 = 1;

type Assignment = (String, String, u32);

struct TopicLog {
    partitions: Vec<Vec<BusMessage>>,
    appended: Arc<Notify>,
}

impl TopicLog {
    fn new(partitions: u32) -> Self {
        Self {
            partitions: (0..partitions).map(|_| Vec::new()).collect(),
            appended: Arc::new(Notify::new()),
        }
    }
}

/// Committed position of one consumer group on one partition
#[derive(Default)]
struct GroupCursor {
    /// Lowest offset not yet acknowledged
    committed: u64,
    /// Acknowledged offsets above `committed`
    acked: BTreeSet<u64>,
}

impl GroupCursor {
    fn is_acked(&self, offset: u64) -> bool {
        offset < self.committed || self.acked.contains(&offset)
    }

    fn ack(&mut self, offset: u64) {
        if offset < self.committed {
            return;
        }
        self.acked.insert(offset);
        while self.acked.remove(&self.committed) {
            self.committed += 1;
        }
    }
}

#[derive(Default)]
struct State {
    topics: HashMap<String, TopicLog>,
    cursors: HashMap<Assignment, GroupCursor>,
    assigned: HashSet<Assignment>,
}

/// EventBus implementation using in-process partition logs
///
/// This implementation is suitable for:
/// - Unit tests (no external dependencies)
/// - Local development without Docker
/// - Integration tests that need fast, isolated message buses
///
/// Records are appended to per-partition logs and kept for the lifetime of
/// the bus. Each consumer group tracks its own committed position per
/// partition, so a new subscription resumes at the first unacknowledged
/// record.
///
/// # Example
/// ```rust
/// use event_bus::{EventBus, InMemoryBus, OutboundMessage};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
///
/// let receipt = bus
///     .publish(OutboundMessage::new("test-events", "key-1", b"hello".to_vec()))
///     .await?;
///
/// let mut stream = bus.subscribe("test-events", "group-a", receipt.partition).await?;
/// let delivery = stream.next().await.unwrap();
/// assert_eq!(delivery.message.payload, b"hello");
/// delivery.ack().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    state: Arc<Mutex<State>>,
    default_partitions: u32,
    ack_delay: Option<Duration>,
}

impl InMemoryBus {
    /// Create a new in-memory event bus
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            default_partitions: DEFAULT_PARTITIONS,
            ack_delay: None,
        }
    }

    /// Partition count for topics created implicitly by a publish
    pub fn with_default_partitions(mut self, partitions: u32) -> Self {
        self.default_partitions = partitions.max(1);
        self
    }

    /// Delay every write acknowledgment (slow broker)
    ///
    /// The record only becomes visible once the delay has elapsed; a publish
    /// abandoned before then never reaches the log.
    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = Some(delay);
        self
    }

    /// Snapshot of every record in a topic, ordered by partition then offset
    pub fn topic_messages(&self, topic: &str) -> Vec<BusMessage> {
        lock(&self.state)
            .topics
            .get(topic)
            .map(|log| log.partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of all topics that currently exist
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.state).topics.keys().cloned().collect();
        names.sort();
        names
    }

    /// First unacknowledged offset of a group on a partition
    pub fn committed_offset(&self, topic: &str, group: &str, partition: u32) -> u64 {
        lock(&self.state)
            .cursors
            .get(&(group.to_string(), topic.to_string(), partition))
            .map(|cursor| cursor.committed)
            .unwrap_or(0)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

struct InMemoryAck {
    state: Arc<Mutex<State>>,
    assignment: Assignment,
    offset: u64,
}

#[async_trait]
impl Acknowledge for InMemoryAck {
    async fn ack(&self) -> BusResult<()> {
        lock(&self.state)
            .cursors
            .entry(self.assignment.clone())
            .or_default()
            .ack(self.offset);
        Ok(())
    }
}

/// Releases a partition assignment when its subscription stream is dropped
struct AssignmentGuard {
    state: Arc<Mutex<State>>,
    assignment: Assignment,
}

impl Drop for AssignmentGuard {
    fn drop(&mut self) {
        lock(&self.state).assigned.remove(&self.assignment);
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn ensure_topic(&self, spec: &TopicSpec) -> BusResult<()> {
        spec.validate()?;

        let mut state = lock(&self.state);
        if let Some(existing) = state.topics.get(&spec.name) {
            let existing = existing.partitions.len() as u32;
            if existing != spec.partitions {
                tracing::warn!(
                    topic = %spec.name,
                    existing,
                    requested = spec.partitions,
                    "Topic already exists with a different partition count"
                );
            }
            return Ok(());
        }

        state
            .topics
            .insert(spec.name.clone(), TopicLog::new(spec.partitions));
        Ok(())
    }

    async fn partition_count(&self, topic: &str) -> BusResult<u32> {
        lock(&self.state)
            .topics
            .get(topic)
            .map(|log| log.partitions.len() as u32)
            .ok_or_else(|| BusError::UnknownTopic(topic.to_string()))
    }

    async fn publish(&self, message: OutboundMessage) -> BusResult<DeliveryReceipt> {
        validate_topic_name(&message.topic)?;

        if let Some(delay) = self.ack_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        let default_partitions = self.default_partitions;
        let log = state
            .topics
            .entry(message.topic.clone())
            .or_insert_with(|| TopicLog::new(default_partitions));

        let partition = partition_for_key(&message.key, log.partitions.len() as u32);
        let records = &mut log.partitions[partition as usize];
        let offset = records.len() as u64;
        records.push(BusMessage {
            topic: message.topic.clone(),
            partition,
            offset,
            key: message.key,
            payload: message.payload,
            headers: message.headers,
        });
        log.appended.notify_waiters();

        Ok(DeliveryReceipt {
            topic: message.topic,
            partition,
            offset,
        })
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> BusResult<BoxStream<'static, Delivery>> {
        let assignment: Assignment = (group.to_string(), topic.to_string(), partition);

        let appended = {
            let mut state = lock(&self.state);
            let log = state
                .topics
                .get(topic)
                .ok_or_else(|| BusError::UnknownTopic(topic.to_string()))?;
            if partition as usize >= log.partitions.len() {
                return Err(BusError::SubscribeError(format!(
                    "{topic} has no partition {partition}"
                )));
            }
            let appended = log.appended.clone();
            if !state.assigned.insert(assignment.clone()) {
                return Err(BusError::SubscribeError(format!(
                    "{topic}[{partition}] is already assigned within group {group}"
                )));
            }
            appended
        };

        let guard = AssignmentGuard {
            state: self.state.clone(),
            assignment: assignment.clone(),
        };
        let state = self.state.clone();

        let stream = async_stream::stream! {
            let _guard = guard;
            let mut position = lock(&state)
                .cursors
                .get(&assignment)
                .map(|cursor| cursor.committed)
                .unwrap_or(0);

            loop {
                // Register interest before looking so an append in between is not missed
                let notified = appended.notified();

                let next = {
                    let state = lock(&state);
                    let cursor = state.cursors.get(&assignment);
                    let records = state
                        .topics
                        .get(&assignment.1)
                        .map(|log| log.partitions[assignment.2 as usize].as_slice())
                        .unwrap_or_default();

                    let mut found = None;
                    while let Some(record) = records.get(position as usize) {
                        position += 1;
                        if !cursor.is_some_and(|c| c.is_acked(record.offset)) {
                            found = Some(record.clone());
                            break;
                        }
                    }
                    found
                };

                match next {
                    Some(message) => {
                        let acker = InMemoryAck {
                            state: state.clone(),
                            assignment: assignment.clone(),
                            offset: message.offset,
                        };
                        yield Delivery::new(message, Box::new(acker));
                    }
                    None => notified.await,
                }
            }
        };

        Ok(stream.boxed())
    }
}
