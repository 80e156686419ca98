//! Per-tenant circuit breakers.
//!
//! - **Closed**: calls flow; consecutive failures are counted
//! - **Open**: calls are rejected without being attempted until the cool-down elapses
//! - **HalfOpen**: exactly one probe call is admitted; its outcome closes or re-opens
//!
//! Breaker state is process-wide, keyed by tenant and independent of any
//! execution. Entries are created Closed on first use.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use fanout_core::TenantId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip a Closed breaker.
    pub failure_threshold: u32,
    /// How long an Open breaker rejects calls before admitting a probe.
    pub cool_down: Duration,
    /// Successful probes needed to close a HalfOpen breaker.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Whether a call may proceed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Proceed. `probe` is set when this call is the single HalfOpen probe.
    Allowed { probe: bool },
    Rejected,
}

impl Admission {
    pub fn is_allowed(self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// Observable breaker state for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStatus {
    pub tenant_id: TenantId,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub trip_count: u64,
    pub probe_in_flight: bool,
}

#[derive(Debug)]
struct Breaker {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    opened_instant: Option<Instant>,
    trip_count: u64,
    probe_in_flight: bool,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            last_success_time: None,
            opened_at: None,
            opened_instant: None,
            trip_count: 0,
            probe_in_flight: false,
        }
    }

    fn trip(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Utc::now());
        self.opened_instant = Some(Instant::now());
        self.success_count = 0;
        self.probe_in_flight = false;
        self.trip_count += 1;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
        self.opened_instant = None;
        self.probe_in_flight = false;
    }

    fn status(&self, tenant_id: &TenantId) -> CircuitBreakerStatus {
        CircuitBreakerStatus {
            tenant_id: tenant_id.clone(),
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure_time: self.last_failure_time,
            last_success_time: self.last_success_time,
            opened_at: self.opened_at,
            trip_count: self.trip_count,
            probe_in_flight: self.probe_in_flight,
        }
    }
}

/// Releases a HalfOpen probe slot unless its outcome was recorded.
#[derive(Debug)]
pub struct ProbeGuard<'a> {
    breakers: &'a CircuitBreakerRegistry,
    tenant: &'a TenantId,
    armed: bool,
}

impl ProbeGuard<'_> {
    /// The outcome was recorded; keep the slot as it is.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breakers.release_probe(self.tenant);
        }
    }
}

/// Sharded map of tenant breakers.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<TenantId, Breaker>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decide whether a call for `tenant` may proceed.
    ///
    /// An Open breaker whose cool-down has elapsed moves to HalfOpen and
    /// admits the caller as its probe. While a probe is in flight every other
    /// caller is rejected.
    pub fn try_acquire(&self, tenant: &TenantId) -> Admission {
        let mut breaker = self
            .breakers
            .entry(tenant.clone())
            .or_insert_with(Breaker::new);

        let state = breaker.state;
        match state {
            CircuitState::Closed => Admission::Allowed { probe: false },
            CircuitState::Open => {
                let cooled = breaker
                    .opened_instant
                    .is_none_or(|at| at.elapsed() >= self.config.cool_down);
                if cooled {
                    breaker.state = CircuitState::HalfOpen;
                    breaker.success_count = 0;
                    breaker.probe_in_flight = true;
                    info!(tenant_id = %tenant, "circuit half-open, admitting probe");
                    Admission::Allowed { probe: true }
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if breaker.probe_in_flight {
                    Admission::Rejected
                } else {
                    breaker.probe_in_flight = true;
                    Admission::Allowed { probe: true }
                }
            }
        }
    }

    /// Record a successful call. `probe` is the flag the call was admitted with.
    ///
    /// While HalfOpen only the admitted probe decides the outcome; a call let
    /// through before the breaker opened cannot close it.
    pub fn record_success(&self, tenant: &TenantId, probe: bool) {
        let mut breaker = self
            .breakers
            .entry(tenant.clone())
            .or_insert_with(Breaker::new);
        breaker.last_success_time = Some(Utc::now());

        let state = breaker.state;
        match state {
            CircuitState::Closed => {
                breaker.success_count = breaker.success_count.saturating_add(1);
                breaker.failure_count = 0;
            }
            CircuitState::HalfOpen if probe => {
                breaker.success_count = breaker.success_count.saturating_add(1);
                breaker.probe_in_flight = false;
                if breaker.success_count >= self.config.success_threshold.max(1) {
                    breaker.close();
                    info!(tenant_id = %tenant, "circuit closed after successful probe");
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    /// Record a failed attempt. Returns `true` when this failure tripped the breaker.
    pub fn record_failure(&self, tenant: &TenantId, probe: bool) -> bool {
        let mut breaker = self
            .breakers
            .entry(tenant.clone())
            .or_insert_with(Breaker::new);
        breaker.last_failure_time = Some(Utc::now());

        let state = breaker.state;
        match state {
            CircuitState::Closed => {
                breaker.failure_count = breaker.failure_count.saturating_add(1);
                breaker.success_count = 0;
                if breaker.failure_count >= self.config.failure_threshold.max(1) {
                    breaker.trip();
                    warn!(
                        tenant_id = %tenant,
                        failures = breaker.failure_count,
                        "circuit opened"
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen if probe => {
                breaker.failure_count = breaker.failure_count.saturating_add(1);
                breaker.trip();
                warn!(tenant_id = %tenant, "probe failed, circuit re-opened");
                true
            }
            CircuitState::HalfOpen | CircuitState::Open => false,
        }
    }

    /// Give back a probe slot whose call ended without an outcome (cancelled).
    pub fn release_probe(&self, tenant: &TenantId) {
        if let Some(mut breaker) = self.breakers.get_mut(tenant) {
            if breaker.state == CircuitState::HalfOpen {
                breaker.probe_in_flight = false;
            }
        }
    }

    /// Hold the probe slot for the lifetime of the returned guard.
    ///
    /// Dropping the guard without `disarm` (early return, cancellation, a
    /// panicking operation) releases the slot.
    pub fn probe_guard<'a>(&'a self, tenant: &'a TenantId, probe: bool) -> ProbeGuard<'a> {
        ProbeGuard {
            breakers: self,
            tenant,
            armed: probe,
        }
    }

    pub fn state(&self, tenant: &TenantId) -> CircuitState {
        self.breakers
            .get(tenant)
            .map(|b| b.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn status_for(&self, tenant: &TenantId) -> Option<CircuitBreakerStatus> {
        self.breakers.get(tenant).map(|b| b.status(tenant))
    }

    /// Every known breaker, ordered by tenant.
    pub fn status(&self) -> Vec<CircuitBreakerStatus> {
        let mut all: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().status(entry.key()))
            .collect();
        all.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        all
    }

    /// Force a tenant's breaker Closed. Returns `false` if the tenant has none.
    pub fn reset(&self, tenant: &TenantId) -> bool {
        match self.breakers.get_mut(tenant) {
            Some(mut breaker) => {
                breaker.close();
                breaker.success_count = 0;
                info!(tenant_id = %tenant, "circuit reset by operator");
                true
            }
            None => false,
        }
    }
}
