pub mod config;
pub mod health;
pub mod models;
pub mod routes;
pub mod service;

pub use routes::products_router;
pub use service::{ProductError, ProductService};
