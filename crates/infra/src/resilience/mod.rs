//! Fault Isolation Layer.
//!
//! Every tenant operation runs behind its tenant's circuit breaker, is
//! retried according to its typed error kind, and holds a bulkhead permit
//! only while it is actually executing.

pub mod circuit_breaker;
pub mod error;
pub mod isolation;
pub mod metrics;
pub mod retry;

pub use circuit_breaker::{
    Admission, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStatus, CircuitState,
    ProbeGuard,
};
pub use error::OperationError;
pub use isolation::{FaultIsolator, IsolationConfig, NoopObserver, RetryObserver};
pub use metrics::{ErrorMetrics, ErrorMetricsSnapshot};
pub use retry::{BackoffStrategy, RetryPolicy};
