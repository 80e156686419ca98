use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use fanout_infra::HealthState;

use crate::app::dto::HealthResponse;
use crate::app::services::AppServices;

/// 200 while starting or serving, 503 once draining so load balancers stop
/// routing here.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let state = services.shutdown.health_state();
    let code = match state {
        HealthState::Starting | HealthState::Ready => StatusCode::OK,
        HealthState::Draining | HealthState::Stopped => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        code,
        Json(HealthResponse {
            status: state,
            in_flight: services.shutdown.in_flight_count(),
        }),
    )
}
