//! Error counters for the fault isolation layer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use fanout_core::TenantId;
use fanout_executions::ErrorCategory;

/// Lock-free counters, safe to share across tasks.
#[derive(Debug, Default)]
pub struct ErrorMetrics {
    total_errors: AtomicU64,
    total_retries: AtomicU64,
    breaker_trips: AtomicU64,
    breaker_rejections: AtomicU64,
    dead_letters: AtomicU64,
    by_category: DashMap<ErrorCategory, u64>,
    by_tenant: DashMap<TenantId, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMetricsSnapshot {
    pub total_errors: u64,
    pub total_retries: u64,
    pub breaker_trips: u64,
    pub breaker_rejections: u64,
    /// Operations that failed after exhausting their retries.
    pub dead_letters: u64,
    pub errors_by_category: BTreeMap<ErrorCategory, u64>,
    pub errors_by_tenant: BTreeMap<TenantId, u64>,
}

impl ErrorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// One failed attempt of a real operation.
    pub fn record_error(&self, tenant: &TenantId, category: ErrorCategory) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        *self.by_category.entry(category).or_default() += 1;
        *self.by_tenant.entry(tenant.clone()).or_default() += 1;
    }

    pub fn record_retry(&self) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trip(&self) {
        self.breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.breaker_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exhausted(&self) {
        self.dead_letters.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ErrorMetricsSnapshot {
        ErrorMetricsSnapshot {
            total_errors: self.total_errors.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            breaker_trips: self.breaker_trips.load(Ordering::Relaxed),
            breaker_rejections: self.breaker_rejections.load(Ordering::Relaxed),
            dead_letters: self.dead_letters.load(Ordering::Relaxed),
            errors_by_category: self
                .by_category
                .iter()
                .map(|e| (*e.key(), *e.value()))
                .collect(),
            errors_by_tenant: self
                .by_tenant
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }
}
