//! Derived read models computed when an execution becomes terminal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use fanout_core::TenantId;

use crate::execution::{Execution, TenantStatus, elapsed_ms};
use crate::taxonomy::{ErrorCategory, ErrorKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub average_duration_ms: f64,
    pub fastest_tenant_ms: Option<u64>,
    pub slowest_tenant_ms: Option<u64>,
    /// Fraction of tenants that completed successfully, 0.0 to 1.0.
    pub success_rate: f64,
    pub throughput_per_second: f64,
    pub total_retries: u64,
    pub total_emails_sent: u64,
    pub total_emails_delivered: u64,
    pub total_emails_failed: u64,
}

impl ExecutionMetrics {
    pub fn compute(execution: &Execution) -> Self {
        let durations: Vec<u64> = execution.tenants().filter_map(|t| t.duration_ms).collect();
        let average_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<u64>() as f64 / durations.len() as f64
        };

        let total = execution.total_tenants;
        let succeeded = execution.count_with_status(TenantStatus::Completed);
        let success_rate = if total == 0 {
            0.0
        } else {
            succeeded as f64 / total as f64
        };

        let finished = execution.tenants().filter(|t| t.status.is_terminal()).count();
        let throughput_per_second = match execution.completed_at {
            Some(end) => {
                let wall_ms = elapsed_ms(execution.initiated_at, end);
                if wall_ms == 0 {
                    finished as f64
                } else {
                    finished as f64 * 1000.0 / wall_ms as f64
                }
            }
            None => 0.0,
        };

        Self {
            average_duration_ms,
            fastest_tenant_ms: durations.iter().copied().min(),
            slowest_tenant_ms: durations.iter().copied().max(),
            success_rate,
            throughput_per_second,
            total_retries: execution.tenants().map(|t| t.retry_count as u64).sum(),
            total_emails_sent: execution.tenants().map(|t| t.emails_sent).sum(),
            total_emails_delivered: execution.tenants().map(|t| t.emails_delivered).sum(),
            total_emails_failed: execution.tenants().map(|t| t.emails_failed).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    pub total_errors: u64,
    pub errors_by_type: BTreeMap<ErrorCategory, u64>,
    pub errors_by_tenant: BTreeMap<TenantId, u64>,
    pub critical_errors: u64,
    pub retryable_errors: u64,
    pub permanent_errors: u64,
    pub breaker_rejections: u64,
    pub most_common_error: Option<ErrorCategory>,
}

impl ErrorSummary {
    /// Summarise the failed tenants of an execution, `None` when nothing failed.
    ///
    /// Each failed tenant contributes one error. Breaker rejections are counted
    /// in the totals but neither as retryable nor as permanent.
    pub fn compute(execution: &Execution) -> Option<Self> {
        let mut summary = ErrorSummary {
            total_errors: 0,
            errors_by_type: BTreeMap::new(),
            errors_by_tenant: BTreeMap::new(),
            critical_errors: 0,
            retryable_errors: 0,
            permanent_errors: 0,
            breaker_rejections: 0,
            most_common_error: None,
        };

        for (tenant, failure) in execution.tenants().filter_map(|t| t.failure().map(|f| (t, f))) {
            summary.total_errors += 1;
            *summary.errors_by_type.entry(failure.category).or_default() += 1;
            *summary
                .errors_by_tenant
                .entry(tenant.tenant_id.clone())
                .or_default() += 1;

            if failure.category.is_critical() {
                summary.critical_errors += 1;
            }
            match failure.kind {
                ErrorKind::Transient => summary.retryable_errors += 1,
                ErrorKind::Permanent | ErrorKind::Validation => summary.permanent_errors += 1,
                ErrorKind::BreakerOpen => summary.breaker_rejections += 1,
                ErrorKind::Cancelled => {}
            }
        }

        if summary.total_errors == 0 {
            return None;
        }

        // Ties resolve to the lexically smallest category name.
        summary.most_common_error = summary
            .errors_by_type
            .iter()
            .max_by(|(ca, na), (cb, nb)| na.cmp(nb).then_with(|| cb.as_str().cmp(ca.as_str())))
            .map(|(c, _)| *c);

        Some(summary)
    }
}
