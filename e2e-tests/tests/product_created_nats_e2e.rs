/// Product-Created Flow E2E - NATS JetStream
///
/// Same happy path as the in-memory flow, against a live broker.
///
/// Requires a JetStream-enabled NATS server (NATS_URL, default
/// nats://localhost:4222).
///
/// Run with: cargo test --test product_created_nats_e2e -- --ignored

mod common;

use axum::http::StatusCode;
use common::*;
use event_bus::{DeliveryOutcome, EventBus, NatsBus, RetryPolicy, TopicSpec};
use notifications_rs::product_created_consumer;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

#[tokio::test]
#[ignore = "requires a running NATS server with JetStream"]
async fn sync_create_is_consumed_over_nats() {
    let url = std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
    let bus: Arc<dyn EventBus> = Arc::new(NatsBus::connect(&url).await.expect("NATS unavailable"));

    // fresh group per run so earlier records are not redelivered here
    let group = format!("{GROUP}-e2e-{}", std::process::id());
    let handler = Arc::new(RecordingHandler::default());
    let consumer = product_created_consumer(
        bus.clone(),
        TopicSpec::new(TOPIC, 3),
        &group,
        RetryPolicy::default(),
        handler.clone(),
    );
    let mut reports = consumer.subscribe_reports();
    let consumer = consumer.start().await.unwrap();

    let response = products_app(bus.clone())
        .oneshot(post_json(
            "/products/sync",
            r#"{"title":"Widget","price":9.99,"quantity":3}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let product_id = body_text(response).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let report = tokio::time::timeout_at(deadline, reports.recv())
            .await
            .expect("no report for created product")
            .unwrap();
        if report.event_id == product_id {
            assert_eq!(report.outcome, DeliveryOutcome::Succeeded);
            break;
        }
    }
    assert!(handler.seen().iter().any(|e| e.product_id == product_id));

    consumer.shutdown().await;
}
