use std::sync::Arc;

use tracing::{info, warn};

use fanout_infra::{
    Deliverer, ExecutionRegistry, ExecutionStore, FanoutConfig, FaultIsolator, InMemoryExecutionStore,
    InMemoryQueue, MessageProcessor, PostgresExecutionStore, ShutdownController, StoreError,
    workers::{IngressWorkerPool, PoolMetrics, WorkerPoolHandle},
};

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppServices {
    pub registry: Arc<ExecutionRegistry>,
    pub isolator: FaultIsolator,
    /// In-process ingress queue fed by `POST /distributions`.
    pub queue: Arc<InMemoryQueue>,
    pub shutdown: Arc<ShutdownController>,
    pub pool_metrics: Arc<PoolMetrics>,
}

impl AppServices {
    /// Everything in memory. Used by tests and when no database is configured.
    pub fn in_memory(config: &FanoutConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryExecutionStore::new()))
    }

    pub fn with_store(config: &FanoutConfig, store: Arc<dyn ExecutionStore>) -> Self {
        let directory = Arc::new(config.tenant_directory());
        if config.tenants.is_empty() {
            warn!("FANOUT_TENANTS not set; every distribution will be rejected");
        }

        Self {
            registry: Arc::new(ExecutionRegistry::new(store, directory)),
            isolator: FaultIsolator::new(config.isolation.clone()),
            queue: Arc::new(InMemoryQueue::new()),
            shutdown: Arc::new(ShutdownController::new()),
            pool_metrics: Arc::new(PoolMetrics::new()),
        }
    }

    /// Start the ingress pool over the in-process queue.
    pub fn spawn_workers(
        &self,
        config: &FanoutConfig,
        deliverer: Arc<dyn Deliverer>,
    ) -> WorkerPoolHandle {
        let processor = Arc::new(MessageProcessor::new(
            Arc::clone(&self.registry),
            self.isolator.clone(),
            deliverer,
            config.processor_config(),
        ));

        IngressWorkerPool::spawn_with_metrics(
            config.pool.clone(),
            self.queue.clone(),
            processor,
            Arc::clone(&self.shutdown),
            Arc::clone(&self.pool_metrics),
        )
    }
}

/// Build services from configuration: Postgres-backed when `DATABASE_URL`
/// is set, in-memory otherwise.
pub async fn build_services(config: &FanoutConfig) -> Result<AppServices, StoreError> {
    match config.database_url.as_deref() {
        Some(url) => {
            let store = PostgresExecutionStore::connect(url).await?;
            info!("using postgres execution store");
            Ok(AppServices::with_store(config, Arc::new(store)))
        }
        None => {
            info!("using in-memory execution store");
            Ok(AppServices::in_memory(config))
        }
    }
}
