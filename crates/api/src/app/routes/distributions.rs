use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use tracing::info;

use fanout_executions::DistributionRequest;
use fanout_infra::MessageQueue;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Enqueue a distribution on the in-process ingress queue.
///
/// Only the JSON shape is checked here. Tenant validation happens in the
/// worker, so unknown tenants end up on the dead-letter queue like any
/// other invalid message.
pub async fn enqueue(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<DistributionRequest>,
) -> axum::response::Response {
    if services.shutdown.is_shutting_down() {
        return errors::json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "shutting_down",
            "not accepting new distributions",
        );
    }

    let payload = match body.to_vec() {
        Ok(p) => p,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
    };

    match services.queue.send(payload).await {
        Ok(message_id) => {
            info!(message_id = %message_id, change_id = %body.change_id, "distribution enqueued");
            (StatusCode::ACCEPTED, Json(dto::EnqueuedResponse { message_id })).into_response()
        }
        Err(e) => errors::queue_error_to_response(e),
    }
}
