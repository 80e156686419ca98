use std::sync::Arc;

use axum::{Json, Router, extract::Extension, response::IntoResponse, routing::get};

use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/errors", get(error_metrics))
        .route("/workers", get(worker_metrics))
}

pub async fn error_metrics(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(services.isolator.error_metrics())
}

pub async fn worker_metrics(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(services.pool_metrics.snapshot())
}
