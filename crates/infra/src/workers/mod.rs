//! Queue consumers.
//!
//! Messages are delivered at least once. Processing is not idempotent across
//! redeliveries: a redelivered message starts a fresh execution.

pub mod pool;
pub mod processor;

pub use pool::{
    IngressWorkerPool, PoolMetrics, PoolMetricsSnapshot, ShutdownReport, WorkerPoolConfig,
    WorkerPoolHandle,
};
pub use processor::{DELIVER_STEP, Disposition, MessageProcessor, ProcessOutcome, ProcessorConfig};
