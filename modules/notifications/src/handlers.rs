use async_trait::async_trait;
use event_bus::{EventHandler, ProcessingError};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{Notification, ProductCreatedEvent};

/// Recipient list notified about new products
pub const PRODUCT_SUBSCRIBERS: &str = "product-subscribers";

/// Delivery mechanism for notifications (email, SMS, ...)
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), ProcessingError>;
}

/// Mock channel: logs the notification and simulates delivery latency
pub struct LogChannel {
    latency: Duration,
}

impl LogChannel {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn send(&self, notification: &Notification) -> Result<(), ProcessingError> {
        tracing::info!(
            recipient = %notification.recipient,
            subject = %notification.subject,
            "Mock: Sending notification"
        );

        // Simulate successful delivery
        tokio::time::sleep(self.latency).await;
        Ok(())
    }
}

/// Handle product-created events
///
/// This handler:
/// 1. Checks the event carries a product id and title
/// 2. Builds a "new product" notification
/// 3. Hands it to the configured channel
///
/// It performs no retries; failures are returned to the retrying consumer.
pub struct ProductCreatedNotificationHandler {
    channel: Arc<dyn NotificationChannel>,
}

impl ProductCreatedNotificationHandler {
    pub fn new(channel: Arc<dyn NotificationChannel>) -> Self {
        Self { channel }
    }

    pub fn notification_for(event: &ProductCreatedEvent) -> Notification {
        Notification {
            recipient: PRODUCT_SUBSCRIBERS.to_string(),
            subject: format!("New product: {}", event.title),
            body: format!(
                "Product {} \"{}\" is available: {} in stock at {:.2}",
                event.product_id, event.title, event.quantity, event.price
            ),
        }
    }
}

#[async_trait]
impl EventHandler<ProductCreatedEvent> for ProductCreatedNotificationHandler {
    async fn handle(&self, event: &ProductCreatedEvent) -> Result<(), ProcessingError> {
        tracing::info!(
            product_id = %event.product_id,
            title = %event.title,
            "Received a new event"
        );

        if event.product_id.trim().is_empty() {
            return Err(ProcessingError::new("product id is blank"));
        }
        if event.title.trim().is_empty() {
            return Err(ProcessingError::new("product title is blank"));
        }

        let notification = Self::notification_for(event);
        self.channel.send(&notification).await?;

        tracing::info!(product_id = %event.product_id, "Notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn send(&self, notification: &Notification) -> Result<(), ProcessingError> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct BrokenChannel;

    #[async_trait]
    impl NotificationChannel for BrokenChannel {
        async fn send(&self, _notification: &Notification) -> Result<(), ProcessingError> {
            Err(ProcessingError::new("smtp unavailable"))
        }
    }

    fn event() -> ProductCreatedEvent {
        ProductCreatedEvent {
            product_id: "p-1".to_string(),
            title: "Widget".to_string(),
            price: 9.99,
            quantity: 3,
        }
    }

    #[tokio::test]
    async fn test_handle_sends_notification() {
        let channel = Arc::new(RecordingChannel::default());
        let handler = ProductCreatedNotificationHandler::new(channel.clone());

        handler.handle(&event()).await.unwrap();

        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, PRODUCT_SUBSCRIBERS);
        assert_eq!(sent[0].subject, "New product: Widget");
        assert!(sent[0].body.contains("p-1"));
        assert!(sent[0].body.contains("9.99"));
    }

    #[tokio::test]
    async fn test_blank_fields_fail() {
        let channel = Arc::new(RecordingChannel::default());
        let handler = ProductCreatedNotificationHandler::new(channel.clone());

        let blank_id = ProductCreatedEvent {
            product_id: " ".to_string(),
            ..event()
        };
        assert!(handler.handle(&blank_id).await.is_err());

        let blank_title = ProductCreatedEvent {
            title: String::new(),
            ..event()
        };
        assert!(handler.handle(&blank_title).await.is_err());

        assert!(channel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_channel_failure_is_processing_error() {
        let handler = ProductCreatedNotificationHandler::new(Arc::new(BrokenChannel));
        let err = handler.handle(&event()).await.unwrap_err();
        assert_eq!(err, ProcessingError::new("smtp unavailable"));
    }

    #[tokio::test]
    async fn test_log_channel_simulates_latency() {
        let channel = LogChannel::new(Duration::from_millis(30));
        let started = std::time::Instant::now();
        channel
            .send(&ProductCreatedNotificationHandler::notification_for(&event()))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
