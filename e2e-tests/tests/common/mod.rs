//! Shared wiring for the product-created flow tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use event_bus::{EventBus, EventHandler, ProcessingError, Publisher, TopicSpec};
use http_body_util::BodyExt;
use notifications_rs::ProductCreatedEvent;
use products_rs::{products_router, ProductService};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TOPIC: &str = "product-created-events-topic";
pub const GROUP: &str = "product-created-events";

/// Records every event it sees; optionally fails every attempt
#[derive(Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<ProductCreatedEvent>>,
    always_fail: bool,
}

impl RecordingHandler {
    pub fn failing() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            always_fail: true,
        }
    }

    pub fn seen(&self) -> Vec<ProductCreatedEvent> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler<ProductCreatedEvent> for RecordingHandler {
    async fn handle(&self, event: &ProductCreatedEvent) -> Result<(), ProcessingError> {
        self.seen.lock().unwrap().push(event.clone());
        if self.always_fail {
            return Err(ProcessingError::new("downstream rejected the notification"));
        }
        Ok(())
    }
}

pub fn products_app(bus: Arc<dyn EventBus>) -> Router {
    let service = ProductService::new(Publisher::new(bus), TOPIC, Duration::from_secs(5));
    products_router(Arc::new(service))
}

pub fn topic_spec() -> TopicSpec {
    TopicSpec::new(TOPIC, 3).with_replication(3, 2)
}

pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Poll until `check` holds or the deadline passes
pub async fn wait_for<F: Fn() -> bool>(check: F, deadline: Duration) -> bool {
    let until = tokio::time::Instant::now() + deadline;
    while tokio::time::Instant::now() < until {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
