pub mod products;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::health::health;
use crate::service::ProductService;

/// Full products API router
pub fn products_router(service: Arc<ProductService>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/products", post(products::create_product))
        .route("/products/sync", post(products::create_product_sync))
        .route("/products/async", post(products::create_product_async))
        .with_state(service)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}
