pub mod config;
pub mod consumer_tasks;
pub mod handlers;
pub mod health;
pub mod models;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use consumer_tasks::{product_created_consumer, start_product_created_consumer};
pub use handlers::{LogChannel, NotificationChannel, ProductCreatedNotificationHandler};
pub use models::{Notification, ProductCreatedEvent};

/// Operational routes exposed alongside the consumer
pub fn notifications_router() -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}
