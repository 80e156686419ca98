use axum::{
    Router,
    routing::{get, post},
};

pub mod circuit_breakers;
pub mod distributions;
pub mod executions;
pub mod metrics;
pub mod system;

/// Router for all operational endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/distributions", post(distributions::enqueue))
        .nest("/executions", executions::router())
        .nest("/circuit-breakers", circuit_breakers::router())
        .nest("/metrics", metrics::router())
        .route("/health", get(system::health))
}
