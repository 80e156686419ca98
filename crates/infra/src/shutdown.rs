//! Two-phase shutdown with in-flight tracking.
//!
//! Phase one (`trigger_shutdown`) tells consumers to stop pulling new work.
//! Phase two (`trigger_abandon`) tells in-flight work to give up at its next
//! suspension point. Both are `watch` channels so late subscribers still see
//! the current value.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;

/// Process health, driven by the shutdown controller.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Starting,
    Ready,
    Draining,
    Stopped,
}

impl HealthState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => HealthState::Starting,
            1 => HealthState::Ready,
            2 => HealthState::Draining,
            _ => HealthState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            HealthState::Starting => 0,
            HealthState::Ready => 1,
            HealthState::Draining => 2,
            HealthState::Stopped => 3,
        }
    }
}

/// Cooperative cancellation handle for in-flight work.
///
/// Cheap to clone. Every await that may block for long (delivery calls,
/// backoff sleeps, permit waits) should race against `cancelled()`.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// A handle that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation fires. Never resolves if the controller is
    /// dropped without firing.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    abandon_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    health_state: Arc<AtomicU8>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_signal, _) = watch::channel(false);
        let (abandon_signal, _) = watch::channel(false);
        Self {
            shutdown_signal,
            abandon_signal,
            in_flight: Arc::new(AtomicU64::new(0)),
            health_state: Arc::new(AtomicU8::new(HealthState::Starting.as_u8())),
        }
    }

    pub fn set_ready(&self) {
        self.set_state(HealthState::Ready);
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        HealthState::from_u8(self.health_state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: HealthState) {
        self.health_state.store(state.as_u8(), Ordering::Release);
    }

    /// Receiver flipped to `true` when consumers must stop pulling.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    #[must_use]
    pub fn cancellation(&self) -> Cancellation {
        Cancellation {
            rx: self.abandon_signal.subscribe(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_signal.borrow()
    }

    /// Stop accepting work. In-flight work continues.
    pub fn trigger_shutdown(&self) {
        self.set_state(HealthState::Draining);
        self.shutdown_signal.send_replace(true);
    }

    /// Ask in-flight work to give up. Implies `trigger_shutdown`.
    pub fn trigger_abandon(&self) {
        self.trigger_shutdown();
        self.abandon_signal.send_replace(true);
    }

    /// RAII guard counting one in-flight unit of work until dropped.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait until nothing is in flight, up to `timeout`.
    ///
    /// Returns `true` (and moves to `Stopped`) when drained.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Acquire) == 0 {
                self.set_state(HealthState::Stopped);
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter on drop, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
