use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use fanout_core::ExecutionId;
use fanout_executions::{Execution, ExecutionFilter};

use super::r#trait::{ExecutionStore, StoreError};

/// In-memory execution store.
///
/// Intended for tests/dev. Can be switched offline to exercise the
/// infrastructure-failure paths of its callers.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    records: DashMap<ExecutionId, Execution>,
    offline: AtomicBool,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn put(&self, execution: &Execution) -> Result<(), StoreError> {
        self.ensure_online()?;
        self.records.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError> {
        self.ensure_online()?;
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn query(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StoreError> {
        self.ensure_online()?;
        // Snapshot first so no shard lock is held while sorting.
        let snapshot: Vec<Execution> = self.records.iter().map(|r| r.value().clone()).collect();
        Ok(filter.apply(&snapshot))
    }
}
