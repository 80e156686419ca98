use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fanout_core::{DomainError, DomainResult, ExecutionId, StepId, TenantId};

use crate::summary::{ErrorSummary, ExecutionMetrics};
use crate::taxonomy::{ErrorCategory, ErrorKind, TenantFailure};

/// Aggregate status of an execution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Partial,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::Partial
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Partial => "partial",
        }
    }
}

impl core::str::FromStr for ExecutionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            "partial" => Ok(ExecutionStatus::Partial),
            other => Err(DomainError::validation(format!("unknown execution status '{other}'"))),
        }
    }
}

/// Status of one tenant's share of an execution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Retrying,
}

impl TenantStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TenantStatus::Completed | TenantStatus::Failed | TenantStatus::Skipped
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

/// One entry of a tenant's step ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: StepId,
    pub name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

/// Per-tenant sub-execution. Owned by its `Execution`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerExecution {
    pub tenant_id: TenantId,
    pub status: TenantStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub steps: Vec<Step>,
    pub error_message: Option<String>,
    pub error_code: Option<ErrorCategory>,
    pub error_kind: Option<ErrorKind>,
    pub retry_count: u32,
    pub emails_sent: u64,
    pub emails_delivered: u64,
    pub emails_failed: u64,
}

impl CustomerExecution {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            status: TenantStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            steps: Vec::new(),
            error_message: None,
            error_code: None,
            error_kind: None,
            retry_count: 0,
            emails_sent: 0,
            emails_delivered: 0,
            emails_failed: 0,
        }
    }

    pub fn step(&self, step_id: StepId) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Reconstructs the classified failure recorded on a failed tenant.
    pub fn failure(&self) -> Option<TenantFailure> {
        if self.status != TenantStatus::Failed {
            return None;
        }
        let category = self.error_code.unwrap_or(ErrorCategory::Internal);
        Some(TenantFailure {
            kind: self.error_kind.unwrap_or_else(|| category.default_kind()),
            category,
            message: self.error_message.clone().unwrap_or_default(),
        })
    }
}

/// Terminal outcome reported for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum TenantOutcome {
    Succeeded,
    Failed(TenantFailure),
    Skipped { reason: String },
}

impl TenantOutcome {
    pub fn failed(failure: TenantFailure) -> Self {
        Self::Failed(failure)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TenantOutcome::Succeeded)
    }
}

/// Input for creating an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExecution {
    pub change_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub initiated_by: String,
    pub tenant_ids: Vec<TenantId>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl NewExecution {
    pub fn new(
        change_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        initiated_by: impl Into<String>,
        tenant_ids: Vec<TenantId>,
    ) -> Self {
        Self {
            change_id: change_id.into(),
            title: title.into(),
            description: description.into(),
            initiated_by: initiated_by.into(),
            tenant_ids,
            priority: Priority::default(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Tenant ids with duplicates removed, first occurrence wins.
    pub fn unique_tenants(&self) -> Vec<TenantId> {
        let mut seen = std::collections::BTreeSet::new();
        self.tenant_ids
            .iter()
            .filter(|t| seen.insert((*t).clone()))
            .cloned()
            .collect()
    }
}

/// Aggregate: one logical multi-tenant operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: ExecutionId,
    pub change_id: String,
    pub title: String,
    pub description: String,
    pub initiated_by: String,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub total_tenants: usize,
    pub tenant_executions: BTreeMap<TenantId, CustomerExecution>,
    pub metrics: Option<ExecutionMetrics>,
    pub error_summary: Option<ErrorSummary>,
    pub priority: Priority,
    pub tags: BTreeMap<String, String>,
}

impl Execution {
    /// Create a Pending execution with one Pending sub-execution per distinct tenant.
    pub fn start(id: ExecutionId, new: NewExecution, now: DateTime<Utc>) -> DomainResult<Self> {
        if new.change_id.trim().is_empty() {
            return Err(DomainError::validation("change_id must not be empty"));
        }
        if new.title.trim().is_empty() {
            return Err(DomainError::validation("title must not be empty"));
        }
        let tenants = new.unique_tenants();
        if tenants.is_empty() {
            return Err(DomainError::validation("at least one tenant is required"));
        }

        let tenant_executions: BTreeMap<_, _> = tenants
            .into_iter()
            .map(|t| (t.clone(), CustomerExecution::new(t)))
            .collect();

        Ok(Self {
            id,
            change_id: new.change_id,
            title: new.title,
            description: new.description,
            initiated_by: new.initiated_by,
            initiated_at: now,
            completed_at: None,
            status: ExecutionStatus::Pending,
            total_tenants: tenant_executions.len(),
            tenant_executions,
            metrics: None,
            error_summary: None,
            priority: new.priority,
            tags: new.tags,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn tenant(&self, tenant_id: &TenantId) -> Option<&CustomerExecution> {
        self.tenant_executions.get(tenant_id)
    }

    pub fn tenants(&self) -> impl Iterator<Item = &CustomerExecution> {
        self.tenant_executions.values()
    }

    pub fn count_with_status(&self, status: TenantStatus) -> usize {
        self.tenants().filter(|t| t.status == status).count()
    }

    fn ensure_open(&self) -> DomainResult<()> {
        if self.is_terminal() {
            return Err(DomainError::finalized(format!(
                "execution {} is {}",
                self.id,
                self.status.as_str()
            )));
        }
        Ok(())
    }

    fn tenant_mut(&mut self, tenant_id: &TenantId) -> DomainResult<&mut CustomerExecution> {
        let id = self.id;
        self.tenant_executions
            .get_mut(tenant_id)
            .ok_or_else(|| DomainError::not_found(format!("tenant {tenant_id} in execution {id}")))
    }

    /// Pending/Retrying -> Running. The first tenant to start promotes the execution.
    pub fn start_tenant(&mut self, tenant_id: &TenantId, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_open()?;
        let tenant = self.tenant_mut(tenant_id)?;
        match tenant.status {
            TenantStatus::Pending | TenantStatus::Retrying => {
                tenant.status = TenantStatus::Running;
                if tenant.started_at.is_none() {
                    tenant.started_at = Some(now);
                }
            }
            TenantStatus::Running => {}
            other => {
                return Err(DomainError::invalid_transition(format!(
                    "tenant {tenant_id} cannot start from {other:?}"
                )));
            }
        }

        if self.status == ExecutionStatus::Pending {
            self.status = ExecutionStatus::Running;
        }
        Ok(())
    }

    /// Running -> Retrying while a backoff is pending.
    pub fn mark_tenant_retrying(
        &mut self,
        tenant_id: &TenantId,
        failure: &TenantFailure,
    ) -> DomainResult<()> {
        self.ensure_open()?;
        let tenant = self.tenant_mut(tenant_id)?;
        if tenant.status != TenantStatus::Running {
            return Err(DomainError::invalid_transition(format!(
                "tenant {tenant_id} cannot retry from {:?}",
                tenant.status
            )));
        }
        tenant.status = TenantStatus::Retrying;
        tenant.retry_count += 1;
        tenant.error_message = Some(failure.message.clone());
        tenant.error_code = Some(failure.category);
        tenant.error_kind = Some(failure.kind);
        Ok(())
    }

    /// Append a Running step to the tenant's ledger.
    pub fn add_step(
        &mut self,
        tenant_id: &TenantId,
        name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<StepId> {
        self.ensure_open()?;
        let tenant = self.tenant_mut(tenant_id)?;
        if tenant.status != TenantStatus::Running {
            return Err(DomainError::invalid_transition(format!(
                "steps can only be added while tenant {tenant_id} is running (status {:?})",
                tenant.status
            )));
        }

        let id = StepId::new();
        tenant.steps.push(Step {
            id,
            name: name.into(),
            status: StepStatus::Running,
            started_at: Some(now),
            completed_at: None,
            duration_ms: None,
            error_message: None,
            retry_count: tenant.retry_count,
        });
        Ok(id)
    }

    /// Move a step forward. Terminal steps are immutable.
    pub fn update_step(
        &mut self,
        tenant_id: &TenantId,
        step_id: StepId,
        status: StepStatus,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_open()?;
        let tenant = self.tenant_mut(tenant_id)?;
        let step = tenant
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| DomainError::not_found(format!("step {step_id} for tenant {tenant_id}")))?;

        if step.status.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "step {step_id} is already {:?}",
                step.status
            )));
        }

        step.status = status;
        if error_message.is_some() {
            step.error_message = error_message;
        }
        if status == StepStatus::Running && step.started_at.is_none() {
            step.started_at = Some(now);
        }
        if status.is_terminal() {
            step.completed_at = Some(now);
            step.duration_ms = step.started_at.map(|s| elapsed_ms(s, now));
        }
        Ok(())
    }

    /// Accumulate delivery counters reported by the downstream collaborator.
    pub fn record_deliveries(
        &mut self,
        tenant_id: &TenantId,
        sent: u64,
        delivered: u64,
        failed: u64,
    ) -> DomainResult<()> {
        self.ensure_open()?;
        let tenant = self.tenant_mut(tenant_id)?;
        tenant.emails_sent += sent;
        tenant.emails_delivered += delivered;
        tenant.emails_failed += failed;
        Ok(())
    }

    /// Record a tenant's terminal outcome.
    ///
    /// Returns `true` when this call made the whole execution terminal.
    pub fn complete_tenant(
        &mut self,
        tenant_id: &TenantId,
        outcome: TenantOutcome,
        now: DateTime<Utc>,
    ) -> DomainResult<bool> {
        self.ensure_open()?;
        let tenant = self.tenant_mut(tenant_id)?;
        if tenant.status.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "tenant {tenant_id} is already {:?}",
                tenant.status
            )));
        }

        close_open_steps(tenant, now);
        tenant.completed_at = Some(now);
        tenant.duration_ms = tenant.started_at.map(|s| elapsed_ms(s, now));

        match outcome {
            TenantOutcome::Succeeded => {
                tenant.status = TenantStatus::Completed;
                tenant.error_message = None;
                tenant.error_code = None;
                tenant.error_kind = None;
            }
            TenantOutcome::Failed(failure) => {
                tenant.status = TenantStatus::Failed;
                tenant.error_message = Some(failure.message);
                tenant.error_code = Some(failure.category);
                tenant.error_kind = Some(failure.kind);
            }
            TenantOutcome::Skipped { reason } => {
                tenant.status = TenantStatus::Skipped;
                tenant.error_message = Some(reason);
            }
        }

        match aggregate_status(self.tenants().map(|t| t.status)) {
            Some(status) => {
                self.finalize(status, now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stop the execution: unfinished tenants are skipped, status becomes Cancelled.
    pub fn cancel(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_open()?;
        let reason = reason.into();
        for tenant in self.tenant_executions.values_mut() {
            if tenant.status.is_terminal() {
                continue;
            }
            close_open_steps(tenant, now);
            tenant.status = TenantStatus::Skipped;
            tenant.completed_at = Some(now);
            tenant.duration_ms = tenant.started_at.map(|s| elapsed_ms(s, now));
            tenant.error_message = Some(reason.clone());
        }
        self.finalize(ExecutionStatus::Cancelled, now);
        Ok(())
    }

    fn finalize(&mut self, status: ExecutionStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
        self.metrics = Some(ExecutionMetrics::compute(self));
        self.error_summary = ErrorSummary::compute(self);
    }
}

/// Aggregate status for a set of tenant statuses.
///
/// Returns `None` while any tenant is still in flight (or the set is empty).
/// All succeeded -> Completed, none succeeded -> Failed, otherwise Partial.
pub fn aggregate_status<I>(statuses: I) -> Option<ExecutionStatus>
where
    I: IntoIterator<Item = TenantStatus>,
{
    let mut total = 0usize;
    let mut succeeded = 0usize;
    for status in statuses {
        if !status.is_terminal() {
            return None;
        }
        total += 1;
        if status == TenantStatus::Completed {
            succeeded += 1;
        }
    }

    match (total, succeeded) {
        (0, _) => None,
        (t, s) if s == t => Some(ExecutionStatus::Completed),
        (_, 0) => Some(ExecutionStatus::Failed),
        _ => Some(ExecutionStatus::Partial),
    }
}

fn close_open_steps(tenant: &mut CustomerExecution, now: DateTime<Utc>) {
    for step in tenant.steps.iter_mut().filter(|s| !s.status.is_terminal()) {
        step.status = StepStatus::Skipped;
        step.completed_at = Some(now);
        step.duration_ms = step.started_at.map(|s| elapsed_ms(s, now));
    }
}

pub(crate) fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}
