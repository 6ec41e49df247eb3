//! Product creation routes
//!
//! - `POST /products` publishes in the configured default mode
//! - `POST /products/sync` waits for the broker acknowledgment
//! - `POST /products/async` returns before the acknowledgment
//!
//! All three answer `201 Created` with the generated id as a plain-text body,
//! or `400 Bad Request` with an [`ErrorMessage`] body.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::models::{CreateProductRequest, ErrorMessage};
use crate::service::{ProductError, ProductService};

/// Failed creation, rendered as `400` with the request path as details
#[derive(Debug)]
pub struct ProductErrorResponse {
    message: String,
    path: String,
}

impl ProductErrorResponse {
    fn new(message: impl Into<String>, uri: &Uri) -> Self {
        Self {
            message: message.into(),
            path: uri.path().to_string(),
        }
    }
}

impl IntoResponse for ProductErrorResponse {
    fn into_response(self) -> Response {
        let body = ErrorMessage::new(self.message, self.path);
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

fn into_error(err: ProductError, uri: &Uri) -> ProductErrorResponse {
    match &err {
        ProductError::Validation(_) => tracing::warn!(error = %err, "Rejected product request"),
        _ => tracing::error!(error = %err, "Product creation failed"),
    }
    ProductErrorResponse::new(err.to_string(), uri)
}

fn parse_body(
    payload: Result<Json<CreateProductRequest>, JsonRejection>,
    uri: &Uri,
) -> Result<CreateProductRequest, ProductErrorResponse> {
    payload
        .map(|Json(request)| request)
        .map_err(|rejection| ProductErrorResponse::new(rejection.body_text(), uri))
}

/// POST /products
pub async fn create_product(
    State(service): State<Arc<ProductService>>,
    uri: Uri,
    payload: Result<Json<CreateProductRequest>, JsonRejection>,
) -> Result<(StatusCode, String), ProductErrorResponse> {
    let request = parse_body(payload, &uri)?;
    let id = service
        .create_default(request)
        .await
        .map_err(|e| into_error(e, &uri))?;
    Ok((StatusCode::CREATED, id))
}

/// POST /products/sync
pub async fn create_product_sync(
    State(service): State<Arc<ProductService>>,
    uri: Uri,
    payload: Result<Json<CreateProductRequest>, JsonRejection>,
) -> Result<(StatusCode, String), ProductErrorResponse> {
    let request = parse_body(payload, &uri)?;
    let id = service
        .create_sync(request)
        .await
        .map_err(|e| into_error(e, &uri))?;
    Ok((StatusCode::CREATED, id))
}

/// POST /products/async
pub async fn create_product_async(
    State(service): State<Arc<ProductService>>,
    uri: Uri,
    payload: Result<Json<CreateProductRequest>, JsonRejection>,
) -> Result<(StatusCode, String), ProductErrorResponse> {
    let request = parse_body(payload, &uri)?;
    let id = service
        .create_async(request)
        .map_err(|e| into_error(e, &uri))?;
    Ok((StatusCode::CREATED, id))
}
