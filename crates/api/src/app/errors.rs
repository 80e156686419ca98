use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use fanout_core::DomainError;
use fanout_infra::{QueueError, RegistryError};

pub fn registry_error_to_response(err: RegistryError) -> axum::response::Response {
    match err {
        RegistryError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("execution {id} not found"))
        }
        RegistryError::UnknownTenant(codes) => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "unknown_tenant",
            format!("unknown tenants: {}", codes.join(", ")),
        ),
        RegistryError::Domain(e) => domain_error_to_response(e),
        RegistryError::Store(e) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", e.to_string())
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        DomainError::Validation(_) | DomainError::InvalidId(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", message)
        }
        DomainError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        DomainError::InvalidTransition(_) | DomainError::Finalized(_) => {
            json_error(StatusCode::CONFLICT, "conflict", message)
        }
        DomainError::InvariantViolation(_) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", message)
        }
    }
}

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
