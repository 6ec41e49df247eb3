use serde::{Deserialize, Serialize};

/// Payload of `product-created-events-topic` records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCreatedEvent {
    pub product_id: String,
    pub title: String,
    pub price: f64,
    pub quantity: i32,
}

/// A message to be delivered through a notification channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}
