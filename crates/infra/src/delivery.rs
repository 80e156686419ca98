//! Downstream delivery collaborator.
//!
//! Template rendering and the mail provider live behind this trait. The
//! implementation classifies its own failures; the isolation layer never
//! inspects message text.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;
use uuid::Uuid;

use fanout_core::{ExecutionId, TenantId};

use crate::resilience::OperationError;

/// Everything a deliverer needs for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    pub execution_id: ExecutionId,
    pub tenant_id: TenantId,
    pub change_id: String,
    pub template_id: String,
    pub template_data: JsonValue,
    /// 1-indexed attempt number.
    pub attempt: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub delivery_id: String,
    pub emails_sent: u64,
    pub emails_delivered: u64,
    pub emails_failed: u64,
}

#[async_trait::async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryReceipt, OperationError>;
}

#[async_trait::async_trait]
impl<D> Deliverer for Arc<D>
where
    D: Deliverer + ?Sized,
{
    async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryReceipt, OperationError> {
        (**self).deliver(request).await
    }
}

/// Logs what would be delivered and reports one successful email per tenant.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunDeliverer;

#[async_trait::async_trait]
impl Deliverer for DryRunDeliverer {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryReceipt, OperationError> {
        info!(
            execution_id = %request.execution_id,
            tenant_id = %request.tenant_id,
            template_id = %request.template_id,
            attempt = request.attempt,
            "dry-run delivery"
        );
        Ok(DeliveryReceipt {
            delivery_id: Uuid::now_v7().to_string(),
            emails_sent: 1,
            emails_delivered: 1,
            emails_failed: 0,
        })
    }
}
