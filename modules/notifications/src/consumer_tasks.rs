use event_bus::{
    BusResult, ConsumerHandle, EventBus, EventHandler, RetryPolicy, RetryingConsumer, TopicSpec,
};
use std::sync::Arc;

use crate::models::ProductCreatedEvent;

/// Build the retrying consumer for product-created events without starting it
pub fn product_created_consumer(
    bus: Arc<dyn EventBus>,
    topic: TopicSpec,
    group: &str,
    policy: RetryPolicy,
    handler: Arc<dyn EventHandler<ProductCreatedEvent>>,
) -> RetryingConsumer<ProductCreatedEvent> {
    RetryingConsumer::new(bus, topic, group, policy, handler)
}

/// Start consumer tasks for product-created events
///
/// Subscribes the group to the primary topic and to every retry topic the
/// policy implies; exhausted or unreadable records land on `<topic>.DLT`.
pub async fn start_product_created_consumer(
    bus: Arc<dyn EventBus>,
    topic: TopicSpec,
    group: &str,
    policy: RetryPolicy,
    handler: Arc<dyn EventHandler<ProductCreatedEvent>>,
) -> BusResult<ConsumerHandle> {
    tracing::info!(
        topic = %topic.name,
        group,
        max_attempts = policy.max_attempts,
        "Starting product created consumer"
    );

    let handle = product_created_consumer(bus, topic, group, policy, handler)
        .start()
        .await?;

    tracing::info!(workers = handle.worker_count(), "Product created consumer running");
    Ok(handle)
}
