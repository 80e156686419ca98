//! Infrastructure layer: execution registry and stores, fault isolation,
//! queue consumption, configuration.

pub mod config;
pub mod delivery;
pub mod execution_store;
pub mod queue;
pub mod registry;
pub mod resilience;
pub mod shutdown;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, FanoutConfig};
pub use delivery::{Deliverer, DeliveryReceipt, DeliveryRequest, DryRunDeliverer};
pub use execution_store::{
    ExecutionStore, InMemoryExecutionStore, PostgresExecutionStore, StoreError,
};
pub use queue::{DeadLetterEntry, InMemoryQueue, MessageQueue, QueueError, QueueMessage};
pub use registry::{ExecutionRegistry, RegistryError};
pub use resilience::{FaultIsolator, IsolationConfig, OperationError};
pub use shutdown::{Cancellation, HealthState, ShutdownController};
pub use workers::{IngressWorkerPool, MessageProcessor, WorkerPoolConfig, WorkerPoolHandle};
