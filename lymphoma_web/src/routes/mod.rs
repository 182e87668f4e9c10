mod demo;
mod health;
mod index;
mod metrics;
mod upload;
mod uploads;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(index::index))
        .route("/upload", post(upload::upload_file))
        .route("/uploads/{filename}", get(uploads::uploaded_file))
        .route("/demo", get(demo::demo_page))
        .route("/demo/classify", post(demo::classify_and_format))
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
}
