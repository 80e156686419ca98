use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use fanout_core::{ExecutionId, TenantId};
use fanout_infra::HealthState;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct CancelExecutionRequest {
    pub reason: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: HealthState,
    pub in_flight: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueuedResponse {
    pub message_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerResetResponse {
    pub tenant_id: TenantId,
    pub reset: bool,
}

// -------------------------
// Path parsing
// -------------------------

pub fn parse_execution_id(raw: &str) -> Result<ExecutionId, axum::response::Response> {
    raw.parse::<ExecutionId>()
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}

pub fn parse_tenant_id(raw: &str) -> Result<TenantId, axum::response::Response> {
    TenantId::new(raw)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}
