//! Retrying consumer
//!
//! Drives every delivery through
//! `Received → Processing → {Succeeded | ScheduledRetry | DeadLettered}`.
//!
//! A failed attempt is republished, body unchanged, to a delay-specific retry
//! topic with its attempt counter bumped. Once the policy's attempt ceiling
//! is reached the record goes to the dead-letter topic instead. The original
//! delivery is acknowledged only after that republication succeeded; if it
//! fails the delivery stays unacknowledged and the broker redelivers it.

use crate::consumer_retry::RetryPolicy;
use crate::{
    headers, BusError, BusMessage, BusResult, Delivery, EventBus, EventEnvelope, Headers,
    OutboundMessage, RetryDecision, TopicSpec,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

const REPORT_CAPACITY: usize = 1024;

/// Failure reported by an event handler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ProcessingError(pub String);

impl ProcessingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Terminal failure after the attempt ceiling was reached
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("retries exhausted after {attempts} attempts: {last_error}")]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: String,
}

/// Business side-effect for a consumed event
///
/// Handlers perform no retries and keep no state across invocations; any
/// error is fed into the consumer's retry policy.
#[async_trait]
pub trait EventHandler<T>: Send + Sync {
    async fn handle(&self, event: &T) -> Result<(), ProcessingError>;
}

/// Per-delivery lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Received,
    Processing,
    Succeeded,
    ScheduledRetry,
    DeadLettered,
}

/// Why a record was dead-lettered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterReason {
    Exhausted(RetryExhausted),
    /// The body could not be decoded; retrying cannot help
    Unreadable(String),
}

impl DeadLetterReason {
    fn code(&self) -> &'static str {
        match self {
            DeadLetterReason::Exhausted(_) => "retries-exhausted",
            DeadLetterReason::Unreadable(_) => "unreadable",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadLetterReason::Exhausted(e) => write!(f, "{e}"),
            DeadLetterReason::Unreadable(e) => write!(f, "unreadable payload: {e}"),
        }
    }
}

/// Result of processing one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Succeeded,
    ScheduledRetry {
        next_attempt: u32,
        delay: Duration,
        retry_topic: String,
    },
    DeadLettered {
        reason: DeadLetterReason,
    },
    /// Republication failed; the delivery was not acknowledged
    Unacknowledged {
        error: String,
    },
    /// Shutdown arrived while waiting for the retry time; not acknowledged
    Interrupted,
}

impl DeliveryOutcome {
    /// State the delivery ended in
    ///
    /// An unacknowledged delivery falls back to `Received`: the broker will
    /// hand it out again.
    pub fn state(&self) -> DeliveryState {
        match self {
            DeliveryOutcome::Succeeded => DeliveryState::Succeeded,
            DeliveryOutcome::ScheduledRetry { .. } => DeliveryState::ScheduledRetry,
            DeliveryOutcome::DeadLettered { .. } => DeliveryState::DeadLettered,
            DeliveryOutcome::Unacknowledged { .. } | DeliveryOutcome::Interrupted => {
                DeliveryState::Received
            }
        }
    }
}

/// Observation of one processed delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub event_id: String,
    pub attempt: u32,
    pub outcome: DeliveryOutcome,
}

/// Consumes a topic and its retry chain on behalf of one consumer group
pub struct RetryingConsumer<T> {
    bus: Arc<dyn EventBus>,
    topic: TopicSpec,
    group: String,
    policy: RetryPolicy,
    handler: Arc<dyn EventHandler<T>>,
    reports: broadcast::Sender<DeliveryReport>,
}

impl<T> Clone for RetryingConsumer<T> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            topic: self.topic.clone(),
            group: self.group.clone(),
            policy: self.policy.clone(),
            handler: self.handler.clone(),
            reports: self.reports.clone(),
        }
    }
}

impl<T> RetryingConsumer<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    /// # Arguments
    /// * `bus` - Shared broker client
    /// * `topic` - Primary topic; retry and dead-letter topics take its shape
    /// * `group` - Consumer group name
    /// * `policy` - Backoff and attempt ceiling
    /// * `handler` - Business side-effect
    pub fn new(
        bus: Arc<dyn EventBus>,
        topic: TopicSpec,
        group: impl Into<String>,
        policy: RetryPolicy,
        handler: Arc<dyn EventHandler<T>>,
    ) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);
        Self {
            bus,
            topic,
            group: group.into(),
            policy,
            handler,
            reports,
        }
    }

    /// Receive a report for every processed delivery
    pub fn subscribe_reports(&self) -> broadcast::Receiver<DeliveryReport> {
        self.reports.subscribe()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Provision the retry chain and spawn one worker per (topic, partition)
    ///
    /// Workers run until [`ConsumerHandle::shutdown`] is called or the handle
    /// is dropped.
    pub async fn start(self) -> BusResult<ConsumerHandle> {
        self.policy
            .validate()
            .map_err(|e| BusError::InternalError(format!("invalid retry policy: {e}")))?;

        self.bus.ensure_topic(&self.topic).await?;
        let partitions = self.bus.partition_count(&self.topic.name).await?;
        let shape = TopicSpec {
            partitions,
            ..self.topic.clone()
        };

        let mut topics = vec![self.topic.name.clone()];
        for retry_topic in self.policy.retry_topics(&self.topic.name) {
            self.bus.ensure_topic(&shape.renamed(retry_topic.as_str())).await?;
            topics.push(retry_topic);
        }
        self.bus
            .ensure_topic(&shape.renamed(RetryPolicy::dlt_topic(&self.topic.name)))
            .await?;

        let mut streams = Vec::with_capacity(topics.len() * partitions as usize);
        for topic in &topics {
            for partition in 0..partitions {
                let stream = self.bus.subscribe(topic, &self.group, partition).await?;
                streams.push((topic.clone(), partition, stream));
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = streams
            .into_iter()
            .map(|(topic, partition, stream)| {
                let consumer = self.clone();
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    consumer.run_worker(&topic, partition, stream, shutdown).await;
                })
            })
            .collect::<Vec<_>>();

        info!(
            topic = %self.topic.name,
            group = %self.group,
            partitions,
            topics = topics.len(),
            workers = workers.len(),
            "Retrying consumer started"
        );

        Ok(ConsumerHandle {
            shutdown: shutdown_tx,
            workers,
        })
    }

    async fn run_worker(
        self,
        topic: &str,
        partition: u32,
        mut stream: BoxStream<'static, Delivery>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!(topic, partition, group = %self.group, "Worker started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = stream.next() => match next {
                    Some(delivery) => {
                        let outcome = self.run_delivery(&delivery, Some(&mut shutdown)).await;
                        if outcome == DeliveryOutcome::Interrupted {
                            break;
                        }
                    }
                    None => {
                        warn!(topic, partition, "Subscription ended");
                        break;
                    }
                },
            }
        }

        debug!(topic, partition, group = %self.group, "Worker stopped");
    }

    /// Run one delivery through the state machine
    ///
    /// Never fails: handler errors and panics are absorbed into the outcome.
    pub async fn process(&self, delivery: &Delivery) -> DeliveryOutcome {
        self.run_delivery(delivery, None).await
    }

    async fn run_delivery(
        &self,
        delivery: &Delivery,
        shutdown: Option<&mut watch::Receiver<bool>>,
    ) -> DeliveryOutcome {
        let message = &delivery.message;
        let attempt = headers::attempt_from(message.header(headers::ATTEMPT));
        let event_id = message
            .header(headers::EVENT_ID)
            .unwrap_or(message.key.as_str())
            .to_string();

        let span = info_span!(
            "delivery",
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            event_id = %event_id,
            attempt
        );

        let outcome = self
            .process_attempt(delivery, attempt, shutdown)
            .instrument(span)
            .await;

        let _ = self.reports.send(DeliveryReport {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            event_id,
            attempt,
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn process_attempt(
        &self,
        delivery: &Delivery,
        attempt: u32,
        shutdown: Option<&mut watch::Receiver<bool>>,
    ) -> DeliveryOutcome {
        let message = &delivery.message;
        debug!(state = ?DeliveryState::Received, "Delivery received");

        if !wait_until_due(message, shutdown).await {
            info!("Shutdown while waiting for retry time; delivery left unacknowledged");
            return DeliveryOutcome::Interrupted;
        }

        let envelope = match EventEnvelope::<T>::from_message(message) {
            Ok(envelope) => envelope,
            Err(e) => {
                return self
                    .dead_letter(delivery, DeadLetterReason::Unreadable(e.to_string()))
                    .await;
            }
        };

        debug!(state = ?DeliveryState::Processing, "Invoking handler");
        let result = AssertUnwindSafe(self.handler.handle(&envelope.payload))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ProcessingError::new("handler panicked")));

        let failure = match result {
            Ok(()) => {
                self.ack(delivery).await;
                debug!(state = ?DeliveryState::Succeeded, "Event processed");
                return DeliveryOutcome::Succeeded;
            }
            Err(e) => e,
        };

        match self.policy.decide(attempt) {
            RetryDecision::Retry {
                next_attempt,
                delay,
            } => self.schedule_retry(delivery, next_attempt, delay, &failure).await,
            RetryDecision::DeadLetter => {
                let reason = DeadLetterReason::Exhausted(RetryExhausted {
                    attempts: attempt,
                    last_error: failure.to_string(),
                });
                self.dead_letter(delivery, reason).await
            }
        }
    }

    async fn schedule_retry(
        &self,
        delivery: &Delivery,
        next_attempt: u32,
        delay: Duration,
        failure: &ProcessingError,
    ) -> DeliveryOutcome {
        let message = &delivery.message;
        let retry_topic = RetryPolicy::retry_topic(&self.topic.name, delay);
        let not_before = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        let mut retry_headers = message.headers.clone();
        retry_headers.insert(headers::ATTEMPT.to_string(), next_attempt.to_string());
        retry_headers.insert(headers::ORIGINAL_TOPIC.to_string(), self.topic.name.clone());
        retry_headers.insert(headers::RETRY_NOT_BEFORE.to_string(), not_before.to_string());

        let republish = self.republish(message, &retry_topic, retry_headers).await;
        if let Err(e) = republish {
            error!(
                retry_topic = %retry_topic,
                error = %e,
                "Failed to publish retry; delivery left unacknowledged"
            );
            return DeliveryOutcome::Unacknowledged {
                error: e.to_string(),
            };
        }

        warn!(
            state = ?DeliveryState::ScheduledRetry,
            error = %failure,
            next_attempt,
            delay_ms = delay.as_millis() as u64,
            retry_topic = %retry_topic,
            "Handler failed, retry scheduled"
        );
        self.ack(delivery).await;

        DeliveryOutcome::ScheduledRetry {
            next_attempt,
            delay,
            retry_topic,
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: DeadLetterReason) -> DeliveryOutcome {
        let message = &delivery.message;
        let dlt_topic = RetryPolicy::dlt_topic(&self.topic.name);

        let mut dlt_headers = message.headers.clone();
        dlt_headers.insert(headers::ORIGINAL_TOPIC.to_string(), self.topic.name.clone());
        dlt_headers.insert(headers::EXCEPTION_MESSAGE.to_string(), reason.to_string());
        dlt_headers.insert(headers::DEAD_LETTER_REASON.to_string(), reason.code().to_string());
        dlt_headers.remove(headers::RETRY_NOT_BEFORE);

        if let Err(e) = self.republish(message, &dlt_topic, dlt_headers).await {
            error!(
                dlt_topic = %dlt_topic,
                error = %e,
                "Failed to publish to dead-letter topic; delivery left unacknowledged"
            );
            return DeliveryOutcome::Unacknowledged {
                error: e.to_string(),
            };
        }

        error!(
            state = ?DeliveryState::DeadLettered,
            dlt_topic = %dlt_topic,
            reason = %reason,
            "Event dead-lettered"
        );
        self.ack(delivery).await;

        DeliveryOutcome::DeadLettered { reason }
    }

    async fn republish(&self, message: &BusMessage, topic: &str, headers: Headers) -> BusResult<()> {
        let outbound = OutboundMessage::new(topic, message.key.clone(), message.payload.clone())
            .with_headers(headers);
        self.bus.publish(outbound).await.map(|_| ())
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = delivery.ack().await {
            warn!(error = %e, "Failed to acknowledge delivery; it may be redelivered");
        }
    }
}

/// Sleep until the record's retry time, if it carries one
///
/// Returns `false` when `shutdown` fired (or its sender is gone) first.
async fn wait_until_due(
    message: &BusMessage,
    shutdown: Option<&mut watch::Receiver<bool>>,
) -> bool {
    let remaining = message
        .header(headers::RETRY_NOT_BEFORE)
        .and_then(|v| v.parse::<i64>().ok())
        .map(|due| due - Utc::now().timestamp_millis())
        .filter(|remaining| *remaining > 0);

    let Some(remaining) = remaining else {
        return true;
    };

    debug!(remaining_ms = remaining, "Waiting for retry delay");
    let sleep = tokio::time::sleep(Duration::from_millis(remaining as u64));
    match shutdown {
        Some(shutdown) => tokio::select! {
            _ = sleep => true,
            _ = shutdown.changed() => false,
        },
        None => {
            sleep.await;
            true
        }
    }
}

/// Running consumer workers
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop all workers between deliveries and wait for them to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Consumer worker terminated abnormally");
            }
        }
        info!("Retrying consumer stopped");
    }
}
