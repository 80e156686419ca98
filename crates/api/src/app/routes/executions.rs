use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    response::IntoResponse,
    routing::{get, post},
};
use tracing::info;

use fanout_executions::ExecutionFilter;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/query", post(query_executions))
        .route("/:id", get(get_execution))
        .route("/:id/cancel", post(cancel_execution))
}

pub async fn get_execution(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_execution_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.registry.get_execution(id).await {
        Ok(execution) => Json(execution).into_response(),
        Err(e) => errors::registry_error_to_response(e),
    }
}

pub async fn query_executions(
    Extension(services): Extension<Arc<AppServices>>,
    Json(filter): Json<ExecutionFilter>,
) -> axum::response::Response {
    match services.registry.query_executions(&filter).await {
        Ok(executions) => Json(executions).into_response(),
        Err(e) => errors::registry_error_to_response(e),
    }
}

pub async fn cancel_execution(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Option<Json<dto::CancelExecutionRequest>>,
) -> axum::response::Response {
    let id = match dto::parse_execution_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "cancelled by operator".to_string());

    match services.registry.cancel_execution(id, reason).await {
        Ok(execution) => {
            info!(execution_id = %id, "execution cancelled via api");
            Json(execution).into_response()
        }
        Err(e) => errors::registry_error_to_response(e),
    }
}
