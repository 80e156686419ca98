//! Ingress worker pool: N long-polling consumers over a `MessageQueue`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use fanout_executions::ExecutionStatus;

use super::processor::{Disposition, MessageProcessor, ProcessOutcome};
use crate::queue::{MessageQueue, QueueMessage};
use crate::shutdown::{Cancellation, ShutdownController};

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of concurrent consumers
    pub workers: usize,
    /// Messages pulled per receive
    pub batch_size: usize,
    /// Long-poll wait per receive
    pub wait_time: Duration,
    /// How long a received message stays hidden from other consumers
    pub visibility_timeout: Duration,
    /// Grace period for in-flight messages after shutdown is requested
    pub shutdown_timeout: Duration,
    /// Extra time given to abandoned work to unwind
    pub abandon_grace: Duration,
    /// Pause after a failed receive
    pub error_backoff: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 10,
            wait_time: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            abandon_grace: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Pool counters, shared by all workers.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    received: AtomicU64,
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
    deferred: AtomicU64,
    redelivered: AtomicU64,
    abandoned: AtomicU64,
    settle_errors: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, outcome: &ProcessOutcome) {
        match &outcome.disposition {
            Disposition::Ack => {
                Self::bump(&self.processed);
                match outcome.status {
                    Some(ExecutionStatus::Completed) => Self::bump(&self.succeeded),
                    Some(ExecutionStatus::Cancelled) | None => {}
                    Some(_) => Self::bump(&self.failed),
                }
            }
            Disposition::DeadLetter { .. } => Self::bump(&self.dead_lettered),
            Disposition::Defer { .. } => Self::bump(&self.deferred),
            Disposition::Retry { .. } => Self::bump(&self.redelivered),
            Disposition::Abandoned => Self::bump(&self.abandoned),
        }
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        let received = self.received.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let dead_lettered = self.dead_lettered.load(Ordering::Relaxed);
        let error_rate = if received == 0 {
            0.0
        } else {
            (failed + dead_lettered) as f64 / received as f64
        };

        PoolMetricsSnapshot {
            received,
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed,
            dead_lettered,
            deferred: self.deferred.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            settle_errors: self.settle_errors.load(Ordering::Relaxed),
            error_rate,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetricsSnapshot {
    pub received: u64,
    /// Acknowledged after every tenant reached a terminal state.
    pub processed: u64,
    /// Processed with an execution that completed.
    pub succeeded: u64,
    /// Processed with an execution that ended Partial or Failed. Operator
    /// cancellations count as neither.
    pub failed: u64,
    pub dead_lettered: u64,
    pub deferred: u64,
    /// Left unacknowledged after an infrastructure failure.
    pub redelivered: u64,
    pub abandoned: u64,
    pub settle_errors: u64,
    pub error_rate: f64,
}

/// How the pool wound down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// All in-flight messages finished inside the shutdown timeout.
    pub drained: bool,
    /// In-flight messages still running after the abandon grace period.
    pub stuck: u64,
}

/// Handle to a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    config: WorkerPoolConfig,
    shutdown: Arc<ShutdownController>,
    metrics: Arc<PoolMetrics>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics_handle(&self) -> Arc<PoolMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop pulling, wait for in-flight messages, then abandon what is left.
    ///
    /// Abandoned messages stay unacknowledged and are redelivered once their
    /// visibility timeout lapses.
    pub async fn shutdown(self) -> ShutdownReport {
        info!(workers = self.workers.len(), "ingress pool shutting down");
        self.shutdown.trigger_shutdown();

        let drained = self
            .shutdown
            .wait_for_drain(self.config.shutdown_timeout)
            .await;
        if !drained {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "shutdown timeout elapsed, abandoning in-flight messages"
            );
            self.shutdown.trigger_abandon();
            self.shutdown.wait_for_drain(self.config.abandon_grace).await;
        }

        // One deadline for all workers, not one grace period each.
        let deadline = tokio::time::Instant::now() + self.config.abandon_grace;
        for worker in self.workers {
            let abort = worker.abort_handle();
            if tokio::time::timeout_at(deadline, worker).await.is_err() {
                abort.abort();
            }
        }

        let stuck = self.shutdown.in_flight_count();
        info!(drained, stuck, "ingress pool stopped");
        ShutdownReport { drained, stuck }
    }
}

/// Spawns and owns the ingress consumers.
#[derive(Debug)]
pub struct IngressWorkerPool;

impl IngressWorkerPool {
    pub fn spawn(
        config: WorkerPoolConfig,
        queue: Arc<dyn MessageQueue>,
        processor: Arc<MessageProcessor>,
        shutdown: Arc<ShutdownController>,
    ) -> WorkerPoolHandle {
        Self::spawn_with_metrics(config, queue, processor, shutdown, Arc::new(PoolMetrics::new()))
    }

    /// Like `spawn`, reporting into counters the caller already shares.
    pub fn spawn_with_metrics(
        config: WorkerPoolConfig,
        queue: Arc<dyn MessageQueue>,
        processor: Arc<MessageProcessor>,
        shutdown: Arc<ShutdownController>,
        metrics: Arc<PoolMetrics>,
    ) -> WorkerPoolHandle {
        let count = config.workers.max(1);

        let workers = (0..count)
            .map(|worker_id| {
                let worker = Worker {
                    config: config.clone(),
                    queue: Arc::clone(&queue),
                    processor: Arc::clone(&processor),
                    shutdown: Arc::clone(&shutdown),
                    metrics: Arc::clone(&metrics),
                };
                tokio::spawn(
                    worker
                        .run()
                        .instrument(info_span!("ingress_worker", worker_id)),
                )
            })
            .collect();

        shutdown.set_ready();
        info!(workers = count, "ingress pool started");

        WorkerPoolHandle {
            config,
            shutdown,
            metrics,
            workers,
        }
    }
}

struct Worker {
    config: WorkerPoolConfig,
    queue: Arc<dyn MessageQueue>,
    processor: Arc<MessageProcessor>,
    shutdown: Arc<ShutdownController>,
    metrics: Arc<PoolMetrics>,
}

impl Worker {
    async fn run(self) {
        let mut stop = self.shutdown.shutdown_receiver();
        let cancel = self.shutdown.cancellation();

        loop {
            if *stop.borrow() {
                break;
            }

            let received = tokio::select! {
                _ = stop.changed() => break,
                r = self.queue.receive(
                    self.config.batch_size,
                    self.config.wait_time,
                    self.config.visibility_timeout,
                ) => r,
            };

            let batch = match received {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "receive failed");
                    if sleep_or_stop(&mut stop, self.config.error_backoff).await {
                        break;
                    }
                    continue;
                }
            };

            for message in batch {
                if self.shutdown.is_shutting_down() {
                    // Not started yet: hand it straight back.
                    self.settle(&message, &Disposition::Defer { delay: Duration::ZERO })
                        .await;
                    continue;
                }
                self.handle(message, &cancel).await;
            }
        }
        debug!("ingress worker stopped");
    }

    async fn handle(&self, message: QueueMessage, cancel: &Cancellation) {
        let _guard = self.shutdown.in_flight_guard();
        PoolMetrics::bump(&self.metrics.received);

        let span = info_span!(
            "ingress_message",
            message_id = %message.message_id,
            receive_count = message.receive_count
        );
        let outcome = self
            .processor
            .process(&message, cancel)
            .instrument(span)
            .await;

        self.metrics.record(&outcome);
        self.settle(&message, &outcome.disposition).await;
    }

    async fn settle(&self, message: &QueueMessage, disposition: &Disposition) {
        let result = match disposition {
            Disposition::Ack => self.queue.ack(message).await,
            Disposition::DeadLetter { reason } => {
                warn!(message_id = %message.message_id, reason = %reason, "dead-lettering message");
                match self.queue.dead_letter(message, reason).await {
                    Ok(()) => self.queue.ack(message).await,
                    Err(e) => Err(e),
                }
            }
            Disposition::Defer { delay } => self.queue.defer(message, *delay).await,
            Disposition::Retry { reason } => {
                warn!(message_id = %message.message_id, reason = %reason, "leaving message for redelivery");
                Ok(())
            }
            Disposition::Abandoned => Ok(()),
        };

        if let Err(e) = result {
            PoolMetrics::bump(&self.metrics.settle_errors);
            error!(message_id = %message.message_id, error = %e, "failed to settle message");
        }
    }
}

/// Returns `true` if shutdown fired while sleeping.
async fn sleep_or_stop(stop: &mut watch::Receiver<bool>, pause: Duration) -> bool {
    tokio::select! {
        _ = stop.changed() => true,
        _ = tokio::time::sleep(pause) => false,
    }
}
