//! End-to-end tests for the ingress pipeline.
//!
//! Queue → IngressWorkerPool → MessageProcessor → FaultIsolator → Deliverer,
//! with progress recorded in the ExecutionRegistry.
//!
//! Verifies:
//! - Invalid messages are dead-lettered before any execution exists
//! - Partial tenant failure still acknowledges the message exactly once
//! - Retries are visible in the ledger
//! - Shutdown abandons stuck work without acknowledging it
//! - An operator cancel during processing acknowledges the message
//! - Far-off schedules are deferred without reaching the redelivery limit

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;

    use fanout_core::{ExecutionId, StaticTenantDirectory, TenantId};
    use fanout_executions::{
        ErrorCategory, ErrorKind, Execution, ExecutionFilter, ExecutionStatus, StepStatus,
        TenantStatus,
    };

    use crate::delivery::{DeliveryReceipt, DeliveryRequest, Deliverer};
    use crate::execution_store::InMemoryExecutionStore;
    use crate::queue::{InMemoryQueue, MessageQueue, QueueError, QueueMessage};
    use crate::registry::ExecutionRegistry;
    use crate::resilience::{CircuitBreakerConfig, FaultIsolator, IsolationConfig, OperationError, RetryPolicy};
    use crate::shutdown::{Cancellation, ShutdownController};
    use crate::workers::{
        DELIVER_STEP, Disposition, IngressWorkerPool, MessageProcessor, ProcessorConfig,
        WorkerPoolConfig, WorkerPoolHandle,
    };

    #[derive(Debug, Clone)]
    enum Behavior {
        Succeed,
        Fail(OperationError),
        /// Fail this many times, then succeed.
        FlakyFor(u32, OperationError),
        Hang,
    }

    /// Deliverer whose outcome per tenant is fixed up front.
    #[derive(Debug, Default)]
    struct ScriptedDeliverer {
        script: HashMap<String, Behavior>,
        calls: Mutex<HashMap<String, u32>>,
    }

    impl ScriptedDeliverer {
        fn new(script: &[(&str, Behavior)]) -> Self {
            Self {
                script: script
                    .iter()
                    .map(|(t, b)| (t.to_string(), b.clone()))
                    .collect(),
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn calls(&self, tenant: &str) -> u32 {
            self.calls.lock().unwrap().get(tenant).copied().unwrap_or(0)
        }
    }

    #[async_trait::async_trait]
    impl Deliverer for ScriptedDeliverer {
        async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryReceipt, OperationError> {
            let tenant = request.tenant_id.as_str().to_string();
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(tenant.clone()).or_default();
                *n += 1;
                *n
            };

            let ok = DeliveryReceipt {
                delivery_id: format!("{tenant}-{call}"),
                emails_sent: 2,
                emails_delivered: 2,
                emails_failed: 0,
            };
            match self.script.get(&tenant).cloned().unwrap_or(Behavior::Succeed) {
                Behavior::Succeed => Ok(ok),
                Behavior::Fail(e) => Err(e),
                Behavior::FlakyFor(n, e) if call <= n => Err(e),
                Behavior::FlakyFor(..) => Ok(ok),
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    Ok(ok)
                }
            }
        }
    }

    /// Cancels the execution from inside the delivery, like an operator
    /// hitting the cancel endpoint mid-flight.
    struct CancellingDeliverer {
        registry: Arc<ExecutionRegistry>,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Deliverer for CancellingDeliverer {
        async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryReceipt, OperationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.registry
                .cancel_execution(request.execution_id, "operator cancelled")
                .await
                .map_err(|e| OperationError::permanent(ErrorCategory::Internal, e.to_string()))?;
            Ok(DeliveryReceipt {
                delivery_id: "cancelled-mid-flight".to_string(),
                emails_sent: 1,
                emails_delivered: 1,
                emails_failed: 0,
            })
        }
    }

    /// Takes the store down once the delivery itself has gone out.
    struct OutageAfterDelivery {
        store: Arc<InMemoryExecutionStore>,
    }

    #[async_trait::async_trait]
    impl Deliverer for OutageAfterDelivery {
        async fn deliver(&self, _: &DeliveryRequest) -> Result<DeliveryReceipt, OperationError> {
            self.store.set_offline(true);
            Ok(DeliveryReceipt {
                delivery_id: "sent".to_string(),
                emails_sent: 1,
                emails_delivered: 1,
                emails_failed: 0,
            })
        }
    }

    /// In-memory queue whose acks never return.
    struct StallingAckQueue(InMemoryQueue);

    #[async_trait::async_trait]
    impl MessageQueue for StallingAckQueue {
        async fn send(&self, body: Vec<u8>) -> Result<String, QueueError> {
            self.0.send(body).await
        }

        async fn receive(
            &self,
            max: usize,
            wait: Duration,
            visibility: Duration,
        ) -> Result<Vec<QueueMessage>, QueueError> {
            self.0.receive(max, wait, visibility).await
        }

        async fn ack(&self, _: &QueueMessage) -> Result<(), QueueError> {
            std::future::pending().await
        }

        async fn release(&self, message: &QueueMessage, delay: Duration) -> Result<(), QueueError> {
            self.0.release(message, delay).await
        }

        async fn defer(&self, message: &QueueMessage, delay: Duration) -> Result<(), QueueError> {
            self.0.defer(message, delay).await
        }

        async fn dead_letter(&self, message: &QueueMessage, reason: &str) -> Result<(), QueueError> {
            self.0.dead_letter(message, reason).await
        }
    }

    struct Harness {
        queue: Arc<InMemoryQueue>,
        store: Arc<InMemoryExecutionStore>,
        registry: Arc<ExecutionRegistry>,
        isolator: FaultIsolator,
        processor: Arc<MessageProcessor>,
        deliverer: Arc<ScriptedDeliverer>,
    }

    fn harness(script: &[(&str, Behavior)]) -> Harness {
        let queue = Arc::new(InMemoryQueue::new());
        let store = Arc::new(InMemoryExecutionStore::new());
        let directory = Arc::new(StaticTenantDirectory::from_codes(["A", "B", "C", "D"]));
        let registry = Arc::new(ExecutionRegistry::new(store.clone(), directory));
        let isolator = FaultIsolator::new(IsolationConfig {
            retry: RetryPolicy::fixed(3, Duration::from_millis(5)),
            breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                cool_down: Duration::from_secs(60),
                success_threshold: 1,
            },
            max_concurrency: 16,
        });
        let deliverer = Arc::new(ScriptedDeliverer::new(script));
        let processor = Arc::new(MessageProcessor::new(
            Arc::clone(&registry),
            isolator.clone(),
            deliverer.clone(),
            ProcessorConfig {
                max_receive_count: 3,
                visibility_timeout: Duration::from_secs(30),
                initiated_by: "test-worker".to_string(),
            },
        ));

        Harness {
            queue,
            store,
            registry,
            isolator,
            processor,
            deliverer,
        }
    }

    fn processor_with(h: &Harness, deliverer: Arc<dyn Deliverer>) -> MessageProcessor {
        MessageProcessor::new(
            Arc::clone(&h.registry),
            h.isolator.clone(),
            deliverer,
            ProcessorConfig::default(),
        )
    }

    fn scheduled_message(change_id: &str, codes: &[&str], ahead: chrono::Duration) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "changeId": change_id,
            "title": "Later",
            "customerCodes": codes,
            "templateId": "tpl",
            "scheduledAt": Utc::now() + ahead,
        }))
        .unwrap()
    }

    fn pool_config() -> WorkerPoolConfig {
        WorkerPoolConfig {
            workers: 2,
            batch_size: 5,
            wait_time: Duration::from_millis(50),
            visibility_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(2),
            abandon_grace: Duration::from_millis(500),
            error_backoff: Duration::from_millis(10),
        }
    }

    fn start_pool(h: &Harness, config: WorkerPoolConfig) -> WorkerPoolHandle {
        IngressWorkerPool::spawn(
            config,
            h.queue.clone(),
            Arc::clone(&h.processor),
            Arc::new(ShutdownController::new()),
        )
    }

    fn message(change_id: &str, codes: &[&str]) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "changeId": change_id,
            "title": "Release notes",
            "description": "Quarterly update",
            "customerCodes": codes,
            "templateId": "tpl-release",
            "templateData": { "version": "4.2" }
        }))
        .unwrap()
    }

    fn transient(msg: &str) -> OperationError {
        OperationError::transient(ErrorCategory::Timeout, msg)
    }

    fn permanent(msg: &str) -> OperationError {
        OperationError::permanent(ErrorCategory::Authentication, msg)
    }

    async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn executions_for(registry: &ExecutionRegistry, change_id: &str) -> Vec<Execution> {
        let filter = ExecutionFilter {
            change_id: Some(change_id.to_string()),
            ..Default::default()
        };
        registry.query_executions(&filter).await.unwrap()
    }

    fn tid(s: &str) -> TenantId {
        TenantId::new(s).unwrap()
    }

    #[tokio::test]
    async fn unknown_tenant_is_dead_lettered_before_any_execution() {
        let h = harness(&[]);
        let id = h.queue.send(message("CHG-B", &["bogus"])).await.unwrap();

        let pool = start_pool(&h, pool_config());
        eventually("dead letter", || h.queue.dead_letters().len() == 1).await;
        eventually("ack", || h.queue.ack_count(&id) == 1).await;
        let report = pool.shutdown().await;

        assert!(report.drained);
        let dlq = h.queue.dead_letters();
        assert_eq!(dlq[0].message_id, id);
        assert!(dlq[0].reason.contains("bogus"));
        assert!(h.queue.is_empty(), "dead-lettered message must not be redelivered");
        assert!(h.store.is_empty());
        assert_eq!(h.deliverer.calls("bogus"), 0);
    }

    #[tokio::test]
    async fn partial_failure_is_acknowledged_exactly_once() {
        let h = harness(&[
            ("A", Behavior::Succeed),
            ("B", Behavior::Fail(permanent("bad credentials"))),
            ("C", Behavior::Succeed),
            ("D", Behavior::Fail(transient("timeout"))),
        ]);
        let id = h
            .queue
            .send(message("CHG-D", &["A", "B", "C", "D"]))
            .await
            .unwrap();

        let pool = start_pool(&h, pool_config());
        eventually("ack", || h.queue.ack_count(&id) == 1).await;
        let metrics = pool.metrics();
        pool.shutdown().await;

        assert_eq!(h.queue.ack_count(&id), 1);
        assert!(h.queue.is_empty());
        assert!(h.queue.dead_letters().is_empty());
        assert_eq!(metrics.processed, 1);
        assert_eq!(metrics.failed, 1);

        let executions = executions_for(&h.registry, "CHG-D").await;
        assert_eq!(executions.len(), 1);
        let execution = &executions[0];
        assert_eq!(execution.status, ExecutionStatus::Partial);
        assert_eq!(execution.count_with_status(TenantStatus::Failed), 2);
        assert_eq!(execution.count_with_status(TenantStatus::Completed), 2);

        // Permanent: one attempt. Transient: every attempt.
        assert_eq!(h.deliverer.calls("B"), 1);
        assert_eq!(h.deliverer.calls("D"), 3);
        let d = execution.tenant(&tid("D")).unwrap();
        assert_eq!(d.retry_count, 2);
        assert_eq!(d.error_kind, Some(ErrorKind::Transient));
        assert_eq!(d.error_code, Some(ErrorCategory::Timeout));

        let summary = execution.error_summary.as_ref().unwrap();
        assert_eq!(summary.total_errors, 2);
        assert_eq!(summary.retryable_errors, 1);
        assert_eq!(summary.permanent_errors, 1);
        assert_eq!(summary.critical_errors, 1);
    }

    #[tokio::test]
    async fn successful_distribution_records_ledger_and_counts() {
        let h = harness(&[("B", Behavior::FlakyFor(1, transient("throttled")))]);
        let id = h.queue.send(message("CHG-OK", &["A", "B", "A"])).await.unwrap();

        let pool = start_pool(&h, pool_config());
        eventually("ack", || h.queue.ack_count(&id) == 1).await;
        pool.shutdown().await;

        let executions = executions_for(&h.registry, "CHG-OK").await;
        let execution = &executions[0];
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.total_tenants, 2);
        assert_eq!(execution.initiated_by, "test-worker");
        assert_eq!(execution.tags.get("templateId").map(String::as_str), Some("tpl-release"));
        assert!(execution.error_summary.is_none());

        let a = execution.tenant(&tid("A")).unwrap();
        assert_eq!(a.steps.len(), 1);
        assert_eq!(a.steps[0].name, DELIVER_STEP);
        assert_eq!(a.steps[0].status, StepStatus::Completed);
        assert_eq!(a.emails_sent, 2);

        // First attempt failed, second succeeded: two ledger entries.
        let b = execution.tenant(&tid("B")).unwrap();
        assert_eq!(b.status, TenantStatus::Completed);
        assert_eq!(b.retry_count, 1);
        let statuses: Vec<_> = b.steps.iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![StepStatus::Failed, StepStatus::Completed]);

        let metrics = execution.metrics.as_ref().unwrap();
        assert_eq!(metrics.total_emails_sent, 4);
        assert_eq!(metrics.total_retries, 1);
    }

    #[tokio::test]
    async fn malformed_body_is_dead_lettered() {
        let h = harness(&[]);
        let id = h.queue.send(b"{not json".to_vec()).await.unwrap();

        let pool = start_pool(&h, pool_config());
        eventually("ack", || h.queue.ack_count(&id) == 1).await;
        let metrics = pool.metrics();
        pool.shutdown().await;

        assert_eq!(h.queue.dead_letters().len(), 1);
        assert_eq!(metrics.dead_lettered, 1);
        assert!(metrics.error_rate > 0.0);
        assert!(h.store.is_empty());
    }

    fn delivery(body: Vec<u8>, receive_count: u32) -> QueueMessage {
        QueueMessage {
            message_id: "m-1".to_string(),
            receipt: "r-1".to_string(),
            body,
            receive_count,
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn redelivery_limit_dead_letters_without_processing() {
        let h = harness(&[]);
        let msg = delivery(message("CHG-P", &["A"]), 4);

        let outcome = h.processor.process(&msg, &Cancellation::never()).await;

        assert!(matches!(
            outcome.disposition,
            Disposition::DeadLetter { ref reason } if reason.contains("redelivery limit")
        ));
        assert!(outcome.execution_id.is_none());
        assert_eq!(h.deliverer.calls("A"), 0);
    }

    #[tokio::test]
    async fn future_schedule_is_deferred() {
        let h = harness(&[]);
        let body = serde_json::to_vec(&json!({
            "changeId": "CHG-LATER",
            "title": "Later",
            "customerCodes": ["A"],
            "templateId": "tpl",
            "scheduledAt": Utc::now() + chrono::Duration::hours(2),
        }))
        .unwrap();

        let outcome = h
            .processor
            .process(&delivery(body, 1), &Cancellation::never())
            .await;

        // Bounded by the visibility timeout.
        assert_eq!(
            outcome.disposition,
            Disposition::Defer {
                delay: Duration::from_secs(30)
            }
        );
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn store_outage_leaves_message_for_redelivery() {
        let h = harness(&[]);
        h.store.set_offline(true);

        let outcome = h
            .processor
            .process(&delivery(message("CHG-DOWN", &["A"]), 1), &Cancellation::never())
            .await;

        assert!(matches!(outcome.disposition, Disposition::Retry { .. }));
        assert_eq!(h.deliverer.calls("A"), 0);
    }

    #[tokio::test]
    async fn redelivered_message_starts_a_new_execution() {
        let h = harness(&[]);
        let body = message("CHG-TWICE", &["A"]);

        let first = h
            .processor
            .process(&delivery(body.clone(), 1), &Cancellation::never())
            .await;
        let second = h
            .processor
            .process(&delivery(body, 2), &Cancellation::never())
            .await;

        assert_eq!(first.disposition, Disposition::Ack);
        assert_eq!(second.disposition, Disposition::Ack);
        assert_ne!(first.execution_id, second.execution_id);
        assert_eq!(executions_for(&h.registry, "CHG-TWICE").await.len(), 2);
    }

    #[tokio::test]
    async fn open_breaker_fails_tenant_without_calling_deliverer() {
        let h = harness(&[("A", Behavior::Fail(transient("timeout")))]);
        let cancel = Cancellation::never();

        // Two messages x three attempts would be six failures; the fifth trips.
        for change in ["CHG-1", "CHG-2"] {
            h.processor
                .process(&delivery(message(change, &["A", "B"]), 1), &cancel)
                .await;
        }
        let calls_before = h.deliverer.calls("A");
        assert_eq!(calls_before, 5);

        let outcome = h
            .processor
            .process(&delivery(message("CHG-3", &["A", "B"]), 1), &cancel)
            .await;

        assert_eq!(outcome.disposition, Disposition::Ack);
        assert_eq!(h.deliverer.calls("A"), calls_before);
        let execution = h
            .registry
            .get_execution(outcome.execution_id.unwrap())
            .await
            .unwrap();
        let a = execution.tenant(&tid("A")).unwrap();
        assert_eq!(a.error_kind, Some(ErrorKind::BreakerOpen));
        assert!(a.steps.is_empty());
        assert_eq!(
            execution.tenant(&tid("B")).unwrap().status,
            TenantStatus::Completed
        );
        assert_eq!(h.isolator.error_metrics().breaker_rejections, 1);
    }

    #[tokio::test]
    async fn shutdown_abandons_stuck_delivery_without_ack() {
        let h = harness(&[("A", Behavior::Hang)]);
        let id = h.queue.send(message("CHG-STUCK", &["A", "B"])).await.unwrap();

        let pool = start_pool(
            &h,
            WorkerPoolConfig {
                shutdown_timeout: Duration::from_millis(100),
                ..pool_config()
            },
        );
        eventually("delivery started", || h.deliverer.calls("A") == 1).await;
        let report = pool.shutdown().await;

        assert!(!report.drained);
        assert_eq!(report.stuck, 0);
        assert_eq!(h.queue.ack_count(&id), 0);
        assert_eq!(h.queue.len(), 1);

        let executions = executions_for(&h.registry, "CHG-STUCK").await;
        let execution = &executions[0];
        assert!(!execution.is_terminal());
        assert_eq!(
            execution.tenant(&tid("B")).unwrap().status,
            TenantStatus::Completed
        );
        assert_eq!(execution.tenant(&tid("A")).unwrap().status, TenantStatus::Running);
        assert_eq!(h.isolator.error_metrics().total_errors, 0);
        assert_eq!(h.registry.live_count(), 0, "abandoned execution must not stay in memory");
    }

    #[tokio::test]
    async fn shutdown_with_idle_pool_drains_immediately() {
        let h = harness(&[]);
        let pool = start_pool(&h, pool_config());
        assert_eq!(pool.worker_count(), 2);

        let report = pool.shutdown().await;
        assert!(report.drained);
        assert_eq!(report.stuck, 0);
    }

    #[tokio::test]
    async fn unknown_execution_lookup_is_not_found() {
        let h = harness(&[]);
        assert!(h.registry.get_execution(ExecutionId::new()).await.is_err());
    }

    #[tokio::test]
    async fn operator_cancel_mid_delivery_acknowledges_message() {
        let h = harness(&[]);
        let deliverer = Arc::new(CancellingDeliverer {
            registry: Arc::clone(&h.registry),
            calls: AtomicU32::new(0),
        });
        let processor = processor_with(&h, deliverer.clone());

        let outcome = processor
            .process(&delivery(message("CHG-CANCEL", &["A"]), 1), &Cancellation::never())
            .await;

        assert_eq!(outcome.disposition, Disposition::Ack);
        assert_eq!(outcome.status, Some(ExecutionStatus::Cancelled));
        assert_eq!(deliverer.calls.load(Ordering::SeqCst), 1, "no retry after cancel");

        let executions = executions_for(&h.registry, "CHG-CANCEL").await;
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Cancelled);
        assert_eq!(
            executions[0].tenant(&tid("A")).unwrap().status,
            TenantStatus::Skipped
        );
        assert_eq!(h.isolator.error_metrics().total_errors, 0);
        assert_eq!(h.registry.live_count(), 0);
    }

    #[tokio::test]
    async fn store_outage_mid_processing_evicts_live_execution() {
        let h = harness(&[]);
        let processor = processor_with(
            &h,
            Arc::new(OutageAfterDelivery {
                store: h.store.clone(),
            }),
        );

        let outcome = processor
            .process(&delivery(message("CHG-OUTAGE", &["A"]), 1), &Cancellation::never())
            .await;

        assert!(matches!(outcome.disposition, Disposition::Retry { .. }));
        assert_eq!(h.registry.live_count(), 0);

        // The last persisted state survives for the redelivery to find.
        h.store.set_offline(false);
        let execution = h
            .registry
            .get_execution(outcome.execution_id.unwrap())
            .await
            .unwrap();
        assert!(!execution.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn far_future_schedule_is_never_dead_lettered() {
        let h = harness(&[]);
        // Two hours ahead: 240 visibility windows of 30s against a limit of 3.
        let id = h
            .queue
            .send(scheduled_message("CHG-FAR", &["A"], chrono::Duration::hours(2)))
            .await
            .unwrap();

        let pool = start_pool(
            &h,
            WorkerPoolConfig {
                workers: 1,
                ..pool_config()
            },
        );
        tokio::time::sleep(Duration::from_secs(315)).await;
        let metrics = pool.metrics();
        pool.shutdown().await;

        assert!(metrics.deferred >= 6, "deferred {} times", metrics.deferred);
        assert_eq!(metrics.dead_lettered, 0);
        assert!(h.queue.dead_letters().is_empty());
        assert_eq!(h.queue.receive_count(&id), Some(0));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn invalid_scheduled_message_is_dead_lettered_at_once() {
        let h = harness(&[]);
        let body = scheduled_message("CHG-FAR-BAD", &["bogus"], chrono::Duration::hours(2));

        let outcome = h
            .processor
            .process(&delivery(body, 1), &Cancellation::never())
            .await;

        assert!(matches!(
            outcome.disposition,
            Disposition::DeadLetter { ref reason } if reason.contains("bogus")
        ));
    }

    #[tokio::test]
    async fn stuck_workers_share_one_abandon_deadline() {
        let h = harness(&[]);
        let queue = Arc::new(StallingAckQueue(InMemoryQueue::new()));
        for i in 0..3 {
            queue
                .send(message(&format!("CHG-ACK-{i}"), &["A"]))
                .await
                .unwrap();
        }

        let controller = Arc::new(ShutdownController::new());
        let config = WorkerPoolConfig {
            workers: 3,
            batch_size: 1,
            shutdown_timeout: Duration::from_millis(100),
            abandon_grace: Duration::from_millis(400),
            ..pool_config()
        };
        let pool = IngressWorkerPool::spawn(
            config,
            queue.clone(),
            Arc::clone(&h.processor),
            Arc::clone(&controller),
        );
        eventually("three stuck acks", || controller.in_flight_count() == 3).await;

        let started = tokio::time::Instant::now();
        let report = pool.shutdown().await;
        let elapsed = started.elapsed();

        assert!(!report.drained);
        // Drain timeout, abandon grace, then one shared join deadline.
        assert!(
            elapsed < Duration::from_millis(100 + 400 + 400 + 300),
            "shutdown took {elapsed:?}"
        );
    }
}
