//! Execution query filter.
//!
//! Pure matching and ordering rules shared by every `ExecutionStore`
//! implementation, so in-memory and durable stores answer identically.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fanout_core::TenantId;

use crate::execution::{Execution, ExecutionStatus, Priority};

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 1000;

/// Filter criteria for execution queries. Every given criterion must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionFilter {
    /// Any of these statuses; empty means all.
    pub status: Vec<ExecutionStatus>,
    /// Executions that include this tenant.
    pub tenant_id: Option<TenantId>,
    pub initiated_by: Option<String>,
    pub change_id: Option<String>,
    /// Inclusive lower bound on `initiatedAt`.
    pub start_time: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `initiatedAt`.
    pub end_time: Option<DateTime<Utc>>,
    /// All pairs must be present on the execution.
    pub tags: BTreeMap<String, String>,
    pub priority: Option<Priority>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ExecutionFilter {
    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status.push(status);
        self
    }

    pub fn for_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn paginate(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Effective page size: default 50, capped at 1000.
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    pub fn matches(&self, execution: &Execution) -> bool {
        if !self.status.is_empty() && !self.status.contains(&execution.status) {
            return false;
        }
        if let Some(tenant) = &self.tenant_id {
            if !execution.tenant_executions.contains_key(tenant) {
                return false;
            }
        }
        if let Some(initiator) = &self.initiated_by {
            if &execution.initiated_by != initiator {
                return false;
            }
        }
        if let Some(change_id) = &self.change_id {
            if &execution.change_id != change_id {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if execution.initiated_at < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if execution.initiated_at > end {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if execution.priority != priority {
                return false;
            }
        }
        self.tags
            .iter()
            .all(|(k, v)| execution.tags.get(k).is_some_and(|have| have == v))
    }

    /// Filter, order (initiatedAt desc, then id desc) and paginate.
    pub fn apply<'a, I>(&self, executions: I) -> Vec<Execution>
    where
        I: IntoIterator<Item = &'a Execution>,
    {
        let mut matched: Vec<&Execution> =
            executions.into_iter().filter(|e| self.matches(e)).collect();
        sort_newest_first(&mut matched);
        matched
            .into_iter()
            .skip(self.effective_offset())
            .take(self.effective_limit())
            .cloned()
            .collect()
    }
}

pub fn sort_newest_first(executions: &mut [&Execution]) {
    executions.sort_by(|a, b| {
        b.initiated_at
            .cmp(&a.initiated_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
