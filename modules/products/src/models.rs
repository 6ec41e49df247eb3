use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Request body for product creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateProductRequest {
    pub title: String,
    pub price: f64,
    pub quantity: i32,
}

impl CreateProductRequest {
    /// Check the request before anything is published
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be blank".to_string());
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err("price must be a non-negative number".to_string());
        }
        if self.quantity < 0 {
            return Err("quantity must not be negative".to_string());
        }
        Ok(())
    }
}

/// Wire payload of a product-created event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCreatedEvent {
    pub product_id: String,
    pub title: String,
    pub price: f64,
    pub quantity: i32,
}

impl ProductCreatedEvent {
    pub fn from_request(product_id: String, request: &CreateProductRequest) -> Self {
        Self {
            product_id,
            title: request.title.clone(),
            price: request.price,
            quantity: request.quantity,
        }
    }
}

/// Error body returned on any failed creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// `yyyy-MM-dd HH:mm:ss`
    pub timestamp: String,
    pub message: String,
    /// Request path
    pub details: String,
}

impl ErrorMessage {
    pub fn new(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            message: message.into(),
            details: details.into(),
        }
    }
}
