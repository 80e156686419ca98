//! Per-message processing: validate, start an execution, fan out per tenant.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use tracing::{debug, error, info, warn};

use fanout_core::{ExecutionId, TenantId};
use fanout_executions::{
    DistributionRequest, ExecutionStatus, StepStatus, TenantFailure, TenantOutcome,
};

use crate::delivery::{DeliveryReceipt, DeliveryRequest, Deliverer};
use crate::queue::QueueMessage;
use crate::registry::{ExecutionRegistry, RegistryError};
use crate::resilience::{FaultIsolator, OperationError, RetryObserver};
use crate::shutdown::Cancellation;

pub const DELIVER_STEP: &str = "deliver";

/// What the worker must do with the message after processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Every tenant reached a terminal state; acknowledge.
    Ack,
    /// Never processable; dead-letter, then acknowledge.
    DeadLetter { reason: String },
    /// Not due yet; give it back with a visibility delay, uncounted.
    Defer { delay: Duration },
    /// Infrastructure failure; leave unacknowledged for redelivery.
    Retry { reason: String },
    /// Shutdown interrupted processing; leave unacknowledged.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub disposition: Disposition,
    pub execution_id: Option<ExecutionId>,
    pub status: Option<ExecutionStatus>,
}

impl ProcessOutcome {
    fn without_execution(disposition: Disposition) -> Self {
        Self {
            disposition,
            execution_id: None,
            status: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Messages received more often than this are dead-lettered unprocessed.
    pub max_receive_count: u32,
    /// Upper bound for deferral delays.
    pub visibility_timeout: Duration,
    /// Recorded as `initiatedBy` on executions started from the queue.
    pub initiated_by: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_receive_count: 5,
            visibility_timeout: Duration::from_secs(300),
            initiated_by: "ingress-worker".to_string(),
        }
    }
}

/// Marks a tenant Retrying while its backoff is pending.
struct RegistryRetryObserver {
    registry: Arc<ExecutionRegistry>,
    execution_id: ExecutionId,
}

#[async_trait::async_trait]
impl RetryObserver for RegistryRetryObserver {
    async fn before_retry(
        &self,
        tenant: &TenantId,
        attempt: u32,
        error: &OperationError,
        delay: Duration,
    ) {
        debug!(
            execution_id = %self.execution_id,
            tenant_id = %tenant,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "tenant retrying"
        );
        if let Err(e) = self
            .registry
            .mark_tenant_retrying(self.execution_id, tenant, &TenantFailure::from(error))
            .await
        {
            warn!(execution_id = %self.execution_id, tenant_id = %tenant, error = %e, "failed to mark tenant retrying");
        }
    }
}

pub struct MessageProcessor {
    registry: Arc<ExecutionRegistry>,
    isolator: FaultIsolator,
    deliverer: Arc<dyn Deliverer>,
    config: ProcessorConfig,
}

impl MessageProcessor {
    pub fn new(
        registry: Arc<ExecutionRegistry>,
        isolator: FaultIsolator,
        deliverer: Arc<dyn Deliverer>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            registry,
            isolator,
            deliverer,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    pub fn isolator(&self) -> &FaultIsolator {
        &self.isolator
    }

    pub async fn process(&self, message: &QueueMessage, cancel: &Cancellation) -> ProcessOutcome {
        if message.receive_count > self.config.max_receive_count {
            return ProcessOutcome::without_execution(Disposition::DeadLetter {
                reason: format!(
                    "redelivery limit exceeded ({} receives, max {})",
                    message.receive_count, self.config.max_receive_count
                ),
            });
        }

        let request = match DistributionRequest::from_slice(&message.body) {
            Ok(r) => r,
            Err(e) => {
                return ProcessOutcome::without_execution(Disposition::DeadLetter {
                    reason: e.to_string(),
                });
            }
        };

        let tenants = match request.validate(self.registry.directory().as_ref()) {
            Ok(t) => t,
            Err(e) => {
                return ProcessOutcome::without_execution(Disposition::DeadLetter {
                    reason: e.to_string(),
                });
            }
        };

        // Deferred deliveries are handed back uncounted, so a far-off schedule
        // never reaches the redelivery limit.
        let now = Utc::now();
        if let Some(at) = request.scheduled_at.filter(|_| request.is_deferred(now)) {
            let until = (at - now).to_std().unwrap_or_default();
            return ProcessOutcome::without_execution(Disposition::Defer {
                delay: until.min(self.config.visibility_timeout),
            });
        }

        let new = request.to_new_execution(&self.config.initiated_by, tenants.clone());
        let execution = match self.registry.start_execution(new).await {
            Ok(e) => e,
            Err(e) if e.is_infrastructure() => {
                error!(message_id = %message.message_id, error = %e, "could not start execution");
                return ProcessOutcome::without_execution(Disposition::Retry {
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                return ProcessOutcome::without_execution(Disposition::DeadLetter {
                    reason: e.to_string(),
                });
            }
        };

        let execution_id = execution.id;
        info!(
            message_id = %message.message_id,
            execution_id = %execution_id,
            change_id = %request.change_id,
            tenants = tenants.len(),
            "processing distribution"
        );

        self.run_tenants(execution_id, &request, &tenants, cancel)
            .await
    }

    async fn run_tenants(
        &self,
        execution_id: ExecutionId,
        request: &DistributionRequest,
        tenants: &[TenantId],
        cancel: &Cancellation,
    ) -> ProcessOutcome {
        let infra_failed = Arc::new(AtomicBool::new(false));
        let rejected: Arc<DashSet<TenantId>> = Arc::new(DashSet::new());
        let observer: Arc<dyn RetryObserver> = Arc::new(RegistryRetryObserver {
            registry: Arc::clone(&self.registry),
            execution_id,
        });

        let op = {
            let registry = Arc::clone(&self.registry);
            let deliverer = Arc::clone(&self.deliverer);
            let infra_failed = Arc::clone(&infra_failed);
            let rejected = Arc::clone(&rejected);
            let change_id = request.change_id.clone();
            let template_id = request.template_id.clone();
            let template_data = request.template_data.clone();

            move |tenant: TenantId, attempt: u32| {
                let registry = Arc::clone(&registry);
                let deliverer = Arc::clone(&deliverer);
                let infra_failed = Arc::clone(&infra_failed);
                let rejected = Arc::clone(&rejected);
                let delivery = DeliveryRequest {
                    execution_id,
                    tenant_id: tenant,
                    change_id: change_id.clone(),
                    template_id: template_id.clone(),
                    template_data: template_data.clone(),
                    attempt,
                };
                async move {
                    let tenant = delivery.tenant_id.clone();
                    deliver_for_tenant(&registry, deliverer.as_ref(), delivery)
                        .await
                        .map_err(|failure| match failure {
                            TenantAttemptError::Operation(e) => e,
                            TenantAttemptError::Registry(e) if e.is_infrastructure() => {
                                infra_failed.store(true, Ordering::SeqCst);
                                OperationError::cancelled(format!("registry unavailable: {e}"))
                            }
                            // The execution no longer takes updates for this
                            // tenant (typically cancelled by an operator).
                            TenantAttemptError::Registry(e) => {
                                warn!(execution_id = %execution_id, tenant_id = %tenant, error = %e, "tenant update rejected, stopping");
                                rejected.insert(tenant);
                                OperationError::cancelled(format!("execution rejected update: {e}"))
                            }
                        })
                }
            }
        };

        let results = self
            .isolator
            .execute_with_customer_isolation(cancel, tenants, observer, op)
            .await;

        let mut abandoned = false;
        let mut status = None;
        for (tenant, result) in results {
            let outcome = match result {
                Ok(_) => TenantOutcome::Succeeded,
                Err(e) if e.is_cancelled() => {
                    if !rejected.contains(&tenant) {
                        abandoned = true;
                    }
                    continue;
                }
                Err(e) => TenantOutcome::failed(TenantFailure::from(e)),
            };

            match self
                .registry
                .complete_tenant_execution(execution_id, &tenant, outcome)
                .await
            {
                Ok(s) => status = Some(s),
                Err(e) => {
                    if e.is_infrastructure() {
                        infra_failed.store(true, Ordering::SeqCst);
                    }
                    error!(execution_id = %execution_id, tenant_id = %tenant, error = %e, "failed to complete tenant");
                }
            }
        }

        let disposition = if infra_failed.load(Ordering::SeqCst) {
            Disposition::Retry {
                reason: "registry unavailable during tenant processing".to_string(),
            }
        } else if abandoned {
            warn!(execution_id = %execution_id, "processing abandoned by shutdown");
            Disposition::Abandoned
        } else {
            Disposition::Ack
        };

        match &disposition {
            // Left non-terminal; the store keeps the record, memory does not.
            Disposition::Retry { .. } | Disposition::Abandoned => {
                self.registry.evict(execution_id);
            }
            _ if status.is_none() => {
                status = self
                    .registry
                    .get_execution(execution_id)
                    .await
                    .ok()
                    .map(|e| e.status);
            }
            _ => {}
        }

        ProcessOutcome {
            disposition,
            execution_id: Some(execution_id),
            status,
        }
    }
}

enum TenantAttemptError {
    Operation(OperationError),
    Registry(RegistryError),
}

impl From<RegistryError> for TenantAttemptError {
    fn from(e: RegistryError) -> Self {
        TenantAttemptError::Registry(e)
    }
}

/// One attempt for one tenant: start (or resume) the tenant, record a
/// `deliver` step around the collaborator call, account the receipt.
async fn deliver_for_tenant(
    registry: &ExecutionRegistry,
    deliverer: &dyn Deliverer,
    request: DeliveryRequest,
) -> Result<DeliveryReceipt, TenantAttemptError> {
    let execution_id = request.execution_id;
    let tenant = request.tenant_id.clone();

    registry.start_tenant_execution(execution_id, &tenant).await?;
    let step = registry.add_step(execution_id, &tenant, DELIVER_STEP).await?;

    match deliverer.deliver(&request).await {
        Ok(receipt) => {
            registry
                .record_deliveries(
                    execution_id,
                    &tenant,
                    receipt.emails_sent,
                    receipt.emails_delivered,
                    receipt.emails_failed,
                )
                .await?;
            registry
                .update_step(execution_id, &tenant, step, StepStatus::Completed, None)
                .await?;
            Ok(receipt)
        }
        Err(e) => {
            registry
                .update_step(
                    execution_id,
                    &tenant,
                    step,
                    StepStatus::Failed,
                    Some(e.message.clone()),
                )
                .await?;
            Err(TenantAttemptError::Operation(e))
        }
    }
}
