use std::sync::Arc;

use thiserror::Error;

use fanout_core::ExecutionId;
use fanout_executions::{Execution, ExecutionFilter};

/// Execution store error.
///
/// Every variant is an infrastructure failure: callers treat them as
/// "try again later", never as a tenant outcome.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backing store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Persistence for execution records.
///
/// `put` is an upsert keyed by execution id. `query` must honour every
/// criterion of the filter including ordering and pagination.
#[async_trait::async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn put(&self, execution: &Execution) -> Result<(), StoreError>;

    async fn get(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError>;

    async fn query(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StoreError>;
}

#[async_trait::async_trait]
impl<S> ExecutionStore for Arc<S>
where
    S: ExecutionStore + ?Sized,
{
    async fn put(&self, execution: &Execution) -> Result<(), StoreError> {
        (**self).put(execution).await
    }

    async fn get(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError> {
        (**self).get(id).await
    }

    async fn query(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StoreError> {
        (**self).query(filter).await
    }
}
