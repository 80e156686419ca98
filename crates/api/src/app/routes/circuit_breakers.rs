use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tracing::info;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_breakers))
        .route("/:tenant/reset", post(reset_breaker))
}

pub async fn list_breakers(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(services.isolator.circuit_breaker_status())
}

pub async fn reset_breaker(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant): Path<String>,
) -> axum::response::Response {
    let tenant_id = match dto::parse_tenant_id(&tenant) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    if !services.isolator.reset_circuit_breaker(&tenant_id) {
        return errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no circuit breaker for tenant {tenant_id}"),
        );
    }

    info!(tenant_id = %tenant_id, "circuit breaker reset via api");
    Json(dto::BreakerResetResponse {
        tenant_id,
        reset: true,
    })
    .into_response()
}
