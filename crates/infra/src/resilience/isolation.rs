//! Per-tenant fault isolation: retry, circuit breaking and a bulkhead ceiling.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info_span, warn};

use fanout_core::TenantId;
use fanout_executions::{ErrorCategory, ErrorKind};

use super::circuit_breaker::{
    Admission, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStatus, CircuitState,
};
use super::error::OperationError;
use super::metrics::{ErrorMetrics, ErrorMetricsSnapshot};
use super::retry::RetryPolicy;
use crate::shutdown::Cancellation;

#[derive(Debug, Clone, PartialEq)]
pub struct IsolationConfig {
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
    /// Upper bound on tenant operations running at once, across all messages.
    pub max_concurrency: usize,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
            max_concurrency: 64,
        }
    }
}

/// Notified before every backoff sleep.
#[async_trait::async_trait]
pub trait RetryObserver: Send + Sync {
    async fn before_retry(
        &self,
        tenant: &TenantId,
        attempt: u32,
        error: &OperationError,
        delay: Duration,
    );
}

/// Observer that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

#[async_trait::async_trait]
impl RetryObserver for NoopObserver {
    async fn before_retry(&self, _: &TenantId, _: u32, _: &OperationError, _: Duration) {}
}

#[derive(Debug)]
struct Inner {
    policy: RetryPolicy,
    breakers: CircuitBreakerRegistry,
    metrics: ErrorMetrics,
    permits: Semaphore,
    max_concurrency: usize,
}

/// Shared handle to the isolation layer. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FaultIsolator {
    inner: Arc<Inner>,
}

impl FaultIsolator {
    pub fn new(config: IsolationConfig) -> Self {
        let max_concurrency = config.max_concurrency.max(1);
        Self {
            inner: Arc::new(Inner {
                policy: config.retry,
                breakers: CircuitBreakerRegistry::new(config.breaker),
                metrics: ErrorMetrics::new(),
                permits: Semaphore::new(max_concurrency),
                max_concurrency,
            }),
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    pub fn circuit_breaker_status(&self) -> Vec<CircuitBreakerStatus> {
        self.inner.breakers.status()
    }

    pub fn circuit_state(&self, tenant: &TenantId) -> CircuitState {
        self.inner.breakers.state(tenant)
    }

    pub fn reset_circuit_breaker(&self, tenant: &TenantId) -> bool {
        self.inner.breakers.reset(tenant)
    }

    pub fn error_metrics(&self) -> ErrorMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Tenant operations currently holding a bulkhead permit.
    pub fn in_use_permits(&self) -> usize {
        self.inner.max_concurrency - self.inner.permits.available_permits()
    }

    /// Run `op` for one tenant with retry and circuit breaking.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        cancel: &Cancellation,
        tenant: &TenantId,
        op: F,
    ) -> Result<T, OperationError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        self.execute_observed(cancel, tenant, &NoopObserver, op).await
    }

    /// `execute_with_retry`, notifying `observer` before each backoff.
    ///
    /// `op` receives the 1-indexed attempt number. An open breaker fails the
    /// call with `BreakerOpen` without invoking `op` or taking a permit.
    pub async fn execute_observed<T, F, Fut>(
        &self,
        cancel: &Cancellation,
        tenant: &TenantId,
        observer: &dyn RetryObserver,
        mut op: F,
    ) -> Result<T, OperationError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let inner = &self.inner;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(OperationError::cancelled("shutdown in progress"));
            }

            let probe = match inner.breakers.try_acquire(tenant) {
                Admission::Rejected => {
                    inner.metrics.record_rejection();
                    debug!(tenant_id = %tenant, "circuit open, operation not attempted");
                    return Err(OperationError::breaker_open(format!(
                        "circuit breaker open for tenant {tenant}"
                    )));
                }
                Admission::Allowed { probe } => probe,
            };
            // Released on every exit that records no outcome, unwinding included.
            let probe_guard = inner.breakers.probe_guard(tenant, probe);

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = inner.permits.acquire() => permit.ok(),
            };
            let Some(permit) = permit else {
                return Err(OperationError::cancelled("abandoned while waiting for capacity"));
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(OperationError::cancelled("abandoned during operation")),
                result = op(attempt) => result,
            };
            drop(permit);

            let err = match outcome {
                Ok(value) => {
                    inner.breakers.record_success(tenant, probe);
                    probe_guard.disarm();
                    return Ok(value);
                }
                Err(err) => err,
            };

            match err.kind {
                ErrorKind::Cancelled | ErrorKind::BreakerOpen => return Err(err),
                ErrorKind::Validation => {
                    inner.metrics.record_error(tenant, err.category);
                    return Err(err);
                }
                ErrorKind::Transient | ErrorKind::Permanent => {}
            }

            inner.metrics.record_error(tenant, err.category);
            if inner.breakers.record_failure(tenant, probe) {
                inner.metrics.record_trip();
            }
            probe_guard.disarm();

            if !err.kind.is_retryable() {
                return Err(err);
            }
            if !inner.policy.should_retry(attempt) {
                inner.metrics.record_exhausted();
                warn!(tenant_id = %tenant, attempts = attempt, error = %err, "retries exhausted");
                return Err(err);
            }
            if inner.breakers.state(tenant) == CircuitState::Open {
                debug!(tenant_id = %tenant, "circuit opened during retries, giving up");
                return Err(err);
            }

            let delay = inner.policy.delay_for_attempt(attempt);
            inner.metrics.record_retry();
            observer.before_retry(tenant, attempt, &err, delay).await;
            debug!(
                tenant_id = %tenant,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after backoff"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(OperationError::cancelled("abandoned during backoff"));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run `op` for every tenant concurrently, one task per tenant.
    ///
    /// Always returns one entry per distinct tenant. One tenant's failure,
    /// open breaker or panic never affects another tenant's result.
    pub async fn execute_with_customer_isolation<T, F, Fut>(
        &self,
        cancel: &Cancellation,
        tenants: &[TenantId],
        observer: Arc<dyn RetryObserver>,
        op: F,
    ) -> BTreeMap<TenantId, Result<T, OperationError>>
    where
        T: Send + 'static,
        F: Fn(TenantId, u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, OperationError>> + Send + 'static,
    {
        let op = Arc::new(op);
        let distinct: BTreeSet<&TenantId> = tenants.iter().collect();

        let mut handles = Vec::with_capacity(distinct.len());
        for tenant in distinct {
            let isolator = self.clone();
            let cancel = cancel.clone();
            let observer = Arc::clone(&observer);
            let op = Arc::clone(&op);
            let t = tenant.clone();
            let span = info_span!("tenant_operation", tenant_id = %t);

            let handle = tokio::spawn(
                async move {
                    isolator
                        .execute_observed(&cancel, &t, observer.as_ref(), |attempt| {
                            op(t.clone(), attempt)
                        })
                        .await
                }
                .instrument(span),
            );
            handles.push((tenant.clone(), handle));
        }

        let mut results = BTreeMap::new();
        for (tenant, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    warn!(tenant_id = %tenant, error = %join_err, "tenant task aborted");
                    Err(OperationError::permanent(
                        ErrorCategory::Internal,
                        format!("tenant task aborted: {join_err}"),
                    ))
                }
            };
            results.insert(tenant, result);
        }
        results
    }
}
