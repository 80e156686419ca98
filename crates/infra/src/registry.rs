//! Execution Registry.
//!
//! Owns the lifecycle of every execution. Live (non-terminal) executions are
//! held in a sharded map, one async mutex per execution, so mutations for one
//! execution are linearisable while different executions never contend.
//!
//! Every mutation is applied to a copy, persisted, and only then committed to
//! memory. A store failure therefore leaves both the store and the live copy
//! at the previous state. Terminal executions are dropped from the live map
//! and served from the store; so are executions whose processing was
//! abandoned, via `evict`.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use fanout_core::{DomainError, DomainResult, ExecutionId, StepId, TenantDirectory, TenantId};
use fanout_executions::{
    Execution, ExecutionFilter, ExecutionStatus, NewExecution, StepStatus, TenantFailure,
    TenantOutcome,
};

use crate::execution_store::{ExecutionStore, StoreError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown tenants: {}", .0.join(", "))]
    UnknownTenant(Vec<String>),

    #[error("execution not found: {0}")]
    NotFound(ExecutionId),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RegistryError {
    /// Infrastructure failures are worth retrying later; everything else is a
    /// caller error.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, RegistryError::Store(_))
    }
}

type Cell = Arc<Mutex<Execution>>;

pub struct ExecutionRegistry {
    store: Arc<dyn ExecutionStore>,
    directory: Arc<dyn TenantDirectory>,
    live: DashMap<ExecutionId, Cell>,
}

impl std::fmt::Debug for ExecutionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRegistry")
            .field("live", &self.live.len())
            .finish_non_exhaustive()
    }
}

impl ExecutionRegistry {
    pub fn new(store: Arc<dyn ExecutionStore>, directory: Arc<dyn TenantDirectory>) -> Self {
        Self {
            store,
            directory,
            live: DashMap::new(),
        }
    }

    pub fn directory(&self) -> &Arc<dyn TenantDirectory> {
        &self.directory
    }

    /// Number of non-terminal executions currently held in memory.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Drop a live execution from memory. The persisted record is untouched
    /// and a later mutation reloads it from the store.
    pub fn evict(&self, id: ExecutionId) -> bool {
        let evicted = self.live.remove(&id).is_some();
        if evicted {
            debug!(execution_id = %id, "evicted live execution");
        }
        evicted
    }

    /// Create and persist a new execution with one Pending entry per tenant.
    #[instrument(
        skip(self, new),
        fields(change_id = %new.change_id, tenants = new.tenant_ids.len()),
        err
    )]
    pub async fn start_execution(&self, new: NewExecution) -> Result<Execution, RegistryError> {
        let unknown: Vec<String> = new
            .unique_tenants()
            .iter()
            .filter(|t| !self.directory.is_known_tenant(t.as_str()))
            .map(|t| t.as_str().to_string())
            .collect();
        if !unknown.is_empty() {
            return Err(RegistryError::UnknownTenant(unknown));
        }

        let execution = Execution::start(ExecutionId::new(), new, Utc::now())?;
        self.store.put(&execution).await?;
        self.live
            .insert(execution.id, Arc::new(Mutex::new(execution.clone())));

        info!(
            execution_id = %execution.id,
            total_tenants = execution.total_tenants,
            "execution started"
        );
        Ok(execution)
    }

    #[instrument(skip(self), fields(execution_id = %id, tenant_id = %tenant), err)]
    pub async fn start_tenant_execution(
        &self,
        id: ExecutionId,
        tenant: &TenantId,
    ) -> Result<(), RegistryError> {
        self.mutate(id, |e| e.start_tenant(tenant, Utc::now())).await
    }

    #[instrument(skip(self, name), fields(execution_id = %id, tenant_id = %tenant), err)]
    pub async fn add_step(
        &self,
        id: ExecutionId,
        tenant: &TenantId,
        name: impl Into<String> + Send,
    ) -> Result<StepId, RegistryError> {
        let name = name.into();
        self.mutate(id, |e| e.add_step(tenant, name, Utc::now())).await
    }

    #[instrument(
        skip(self, error_message),
        fields(execution_id = %id, tenant_id = %tenant, step_id = %step),
        err
    )]
    pub async fn update_step(
        &self,
        id: ExecutionId,
        tenant: &TenantId,
        step: StepId,
        status: StepStatus,
        error_message: Option<String>,
    ) -> Result<(), RegistryError> {
        self.mutate(id, |e| {
            e.update_step(tenant, step, status, error_message, Utc::now())
        })
        .await
    }

    #[instrument(skip(self, failure), fields(execution_id = %id, tenant_id = %tenant), err)]
    pub async fn mark_tenant_retrying(
        &self,
        id: ExecutionId,
        tenant: &TenantId,
        failure: &TenantFailure,
    ) -> Result<(), RegistryError> {
        self.mutate(id, |e| e.mark_tenant_retrying(tenant, failure))
            .await
    }

    #[instrument(skip(self), fields(execution_id = %id, tenant_id = %tenant), err)]
    pub async fn record_deliveries(
        &self,
        id: ExecutionId,
        tenant: &TenantId,
        sent: u64,
        delivered: u64,
        failed: u64,
    ) -> Result<(), RegistryError> {
        self.mutate(id, |e| e.record_deliveries(tenant, sent, delivered, failed))
            .await
    }

    /// Record a tenant's terminal outcome; returns the execution status afterwards.
    #[instrument(skip(self, outcome), fields(execution_id = %id, tenant_id = %tenant), err)]
    pub async fn complete_tenant_execution(
        &self,
        id: ExecutionId,
        tenant: &TenantId,
        outcome: TenantOutcome,
    ) -> Result<ExecutionStatus, RegistryError> {
        let (finished, status) = self
            .mutate(id, |e| {
                let finished = e.complete_tenant(tenant, outcome, Utc::now())?;
                Ok((finished, e.status))
            })
            .await?;

        if finished {
            info!(execution_id = %id, status = status.as_str(), "execution finished");
        }
        Ok(status)
    }

    /// Cancel a non-terminal execution: unfinished tenants are skipped.
    #[instrument(skip(self, reason), fields(execution_id = %id), err)]
    pub async fn cancel_execution(
        &self,
        id: ExecutionId,
        reason: impl Into<String> + Send,
    ) -> Result<Execution, RegistryError> {
        let reason = reason.into();
        let execution = self
            .mutate(id, |e| {
                e.cancel(reason, Utc::now())?;
                Ok(e.clone())
            })
            .await?;
        info!(execution_id = %id, "execution cancelled");
        Ok(execution)
    }

    #[instrument(skip(self), fields(execution_id = %id), err)]
    pub async fn get_execution(&self, id: ExecutionId) -> Result<Execution, RegistryError> {
        let cell = self.live.get(&id).map(|c| Arc::clone(c.value()));
        if let Some(cell) = cell {
            return Ok(cell.lock().await.clone());
        }
        self.store
            .get(id)
            .await?
            .ok_or(RegistryError::NotFound(id))
    }

    /// Pure read over the persisted records.
    #[instrument(skip(self, filter), err)]
    pub async fn query_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<Execution>, RegistryError> {
        Ok(self.store.query(filter).await?)
    }

    async fn cell(&self, id: ExecutionId) -> Result<Cell, RegistryError> {
        if let Some(cell) = self.live.get(&id) {
            return Ok(Arc::clone(cell.value()));
        }

        let execution = self
            .store
            .get(id)
            .await?
            .ok_or(RegistryError::NotFound(id))?;

        if execution.is_terminal() {
            // Terminal records are immutable; the domain layer will reject the
            // mutation, no need to cache them.
            return Ok(Arc::new(Mutex::new(execution)));
        }

        debug!(execution_id = %id, "reloaded live execution from store");
        let cell = self
            .live
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(execution)));
        Ok(Arc::clone(cell.value()))
    }

    async fn mutate<T, F>(&self, id: ExecutionId, f: F) -> Result<T, RegistryError>
    where
        F: FnOnce(&mut Execution) -> DomainResult<T>,
    {
        let cell = self.cell(id).await?;
        let mut current = cell.lock().await;

        let mut next = current.clone();
        let out = f(&mut next)?;
        self.store.put(&next).await?;
        *current = next;

        if current.is_terminal() {
            self.live.remove(&id);
        }
        Ok(out)
    }
}
