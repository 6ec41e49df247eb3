//! Product creation service
//!
//! Generates the product id, wraps the request in an event envelope and hands
//! it to the publisher. The id doubles as the partition key, so every event of
//! one product lands on the same partition.

use event_bus::{EventEnvelope, PublishError, PublishMode, Publisher};
use std::time::Duration;
use uuid::Uuid;

use crate::models::{CreateProductRequest, ProductCreatedEvent};

pub const SOURCE_MODULE: &str = "products";

#[derive(Debug, thiserror::Error)]
pub enum ProductError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("publish timed out after {}ms", .0.as_millis())]
    PublishTimeout(Duration),

    #[error("publish failed: {0}")]
    PublishFailure(String),
}

impl From<PublishError> for ProductError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Timeout { timeout, .. } => ProductError::PublishTimeout(timeout),
            PublishError::Failure(e) => ProductError::PublishFailure(e.to_string()),
        }
    }
}

pub struct ProductService {
    publisher: Publisher,
    topic: String,
    sync_timeout: Duration,
    default_mode: PublishMode,
}

impl ProductService {
    /// Async by default; see [`ProductService::with_default_mode`]
    pub fn new(publisher: Publisher, topic: impl Into<String>, sync_timeout: Duration) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            sync_timeout,
            default_mode: PublishMode::Async,
        }
    }

    pub fn with_default_mode(mut self, mode: PublishMode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn default_mode(&self) -> PublishMode {
        self.default_mode
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Envelope for a request under a given id; fields are copied verbatim
    pub fn build_event(
        product_id: String,
        request: &CreateProductRequest,
    ) -> EventEnvelope<ProductCreatedEvent> {
        let payload = ProductCreatedEvent::from_request(product_id.clone(), request);
        EventEnvelope::with_event_id(product_id, SOURCE_MODULE.to_string(), payload)
            .with_source_version(env!("CARGO_PKG_VERSION").to_string())
    }

    /// Create in the configured default mode
    pub async fn create_default(&self, request: CreateProductRequest) -> Result<String, ProductError> {
        self.create(request, self.default_mode).await
    }

    pub async fn create(
        &self,
        request: CreateProductRequest,
        mode: PublishMode,
    ) -> Result<String, ProductError> {
        match mode {
            PublishMode::Sync { timeout } => self.create_with_timeout(request, timeout).await,
            PublishMode::Async => self.create_async(request),
        }
    }

    /// Returns the id only after the broker acknowledged the event
    pub async fn create_sync(&self, request: CreateProductRequest) -> Result<String, ProductError> {
        self.create_with_timeout(request, self.sync_timeout).await
    }

    async fn create_with_timeout(
        &self,
        request: CreateProductRequest,
        timeout: Duration,
    ) -> Result<String, ProductError> {
        request.validate().map_err(ProductError::Validation)?;

        let envelope = Self::build_event(Uuid::new_v4().to_string(), &request);
        tracing::info!(product_id = %envelope.event_id, "Before publishing a ProductCreatedEvent");

        let receipt = self
            .publisher
            .publish_sync(&self.topic, envelope.partition_key(), &envelope, timeout)
            .await?;

        tracing::info!(
            product_id = %envelope.event_id,
            partition = receipt.partition,
            offset = receipt.offset,
            "Returning product id"
        );
        Ok(envelope.event_id)
    }

    /// Returns the id immediately; publish errors are only logged
    pub fn create_async(&self, request: CreateProductRequest) -> Result<String, ProductError> {
        request.validate().map_err(ProductError::Validation)?;

        let envelope = Self::build_event(Uuid::new_v4().to_string(), &request);
        let product_id = envelope.event_id.clone();

        let callback_id = product_id.clone();
        self.publisher
            .publish_async(&self.topic, envelope.partition_key(), &envelope, move |result| {
                if let Err(e) = result {
                    tracing::error!(
                        product_id = %callback_id,
                        error = %e,
                        "ProductCreatedEvent was not delivered"
                    );
                }
            });

        tracing::info!(product_id = %product_id, "Returning product id");
        Ok(product_id)
    }
}
