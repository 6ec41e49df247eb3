//! HTTP boundary tests for the products API over the in-memory bus

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use event_bus::{EventBus, InMemoryBus, PublishMode, Publisher, TopicSpec};
use http_body_util::BodyExt;
use products_rs::{models::ProductCreatedEvent, products_router, ProductService};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const TOPIC: &str = "product-created-events-topic";

async fn setup(bus: InMemoryBus, sync_timeout: Duration) -> (Arc<InMemoryBus>, Router) {
    bus.ensure_topic(&TopicSpec::new(TOPIC, 3).with_replication(3, 2))
        .await
        .unwrap();
    let bus = Arc::new(bus);
    let service = ProductService::new(Publisher::new(bus.clone()), TOPIC, sync_timeout);
    (bus, products_router(Arc::new(service)))
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::http::Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

const WIDGET: &str = r#"{"title":"Widget","price":9.99,"quantity":3}"#;

#[tokio::test]
async fn sync_endpoint_returns_id_after_ack() {
    let (bus, app) = setup(InMemoryBus::new(), Duration::from_secs(1)).await;

    let response = app.oneshot(post_json("/products/sync", WIDGET)).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_text(response).await;
    assert_eq!(id.len(), 36);

    let stored = bus.topic_messages(TOPIC);
    assert_eq!(stored.len(), 1);
    let event: ProductCreatedEvent = serde_json::from_slice(&stored[0].payload).unwrap();
    assert_eq!(
        event,
        ProductCreatedEvent {
            product_id: id.clone(),
            title: "Widget".to_string(),
            price: 9.99,
            quantity: 3,
        }
    );
    assert_eq!(stored[0].key, id);
}

#[tokio::test]
async fn async_endpoint_returns_before_ack() {
    let slow = InMemoryBus::new().with_ack_delay(Duration::from_millis(200));
    let (bus, app) = setup(slow, Duration::from_secs(1)).await;

    let response = app.oneshot(post_json("/products/async", WIDGET)).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_text(response).await;
    assert!(bus.topic_messages(TOPIC).is_empty());

    tokio::time::sleep(Duration::from_millis(400)).await;
    let stored = bus.topic_messages(TOPIC);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].key, id);
}

#[tokio::test]
async fn sync_timeout_maps_to_400() {
    let slow = InMemoryBus::new().with_ack_delay(Duration::from_millis(300));
    let (bus, app) = setup(slow, Duration::from_millis(30)).await;

    let response = app.oneshot(post_json("/products/sync", WIDGET)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("timed out"));
    assert_eq!(body["details"], "/products/sync");
    assert!(body["timestamp"].is_string());
    assert!(bus.topic_messages(TOPIC).is_empty());
}

#[tokio::test]
async fn default_endpoint_uses_configured_mode() {
    let bus = InMemoryBus::new();
    bus.ensure_topic(&TopicSpec::new(TOPIC, 3)).await.unwrap();
    let bus = Arc::new(bus);
    let service = ProductService::new(Publisher::new(bus.clone()), TOPIC, Duration::from_secs(1))
        .with_default_mode(PublishMode::Sync {
            timeout: Duration::from_secs(1),
        });
    let app = products_router(Arc::new(service));

    let response = app.oneshot(post_json("/products", WIDGET)).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(bus.topic_messages(TOPIC).len(), 1);
}

#[tokio::test]
async fn validation_error_returns_400_and_publishes_nothing() {
    let (bus, app) = setup(InMemoryBus::new(), Duration::from_secs(1)).await;

    let response = app
        .oneshot(post_json(
            "/products",
            r#"{"title":"  ","price":9.99,"quantity":3}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("title"));
    assert_eq!(body["details"], "/products");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(bus.topic_messages(TOPIC).is_empty());
}

#[tokio::test]
async fn malformed_json_returns_400_error_body() {
    let (_bus, app) = setup(InMemoryBus::new(), Duration::from_secs(1)).await;

    let response = app
        .oneshot(post_json("/products/sync", r#"{"title":"Widget","price":"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["details"], "/products/sync");
    assert!(!body["message"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn health_endpoint() {
    let (_bus, app) = setup(InMemoryBus::new(), Duration::from_secs(1)).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "products-rs");
}
