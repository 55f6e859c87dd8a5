//! Per-provider circuit breaker.
//!
//! Three states: `Closed` (requests flow normally), `Open` (requests are
//! rejected until `open_timeout_ms` elapses), `HalfOpen` (a limited number of
//! probe requests are allowed through to test recovery). A run of
//! `failure_threshold` failures within `time_window_ms` trips the breaker;
//! `success_threshold` consecutive probe successes closes it again.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use theo_core::ResilienceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    failure_timestamps: Vec<Instant>,
    opened_at: Option<Instant>,
    probe_successes: u32,
    probe_in_flight: bool,
}

/// A single provider's breaker. One instance is held per provider behind the
/// resilience layer's dispatch table.
pub struct CircuitBreaker {
    config: ResilienceConfig,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Allowed,
    AllowedAsProbe,
    Rejected,
}

impl CircuitBreaker {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_timestamps: Vec::new(),
                opened_at: None,
                probe_successes: 0,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("circuit breaker mutex poisoned").state
    }

    /// Call before dispatching a request. Transitions `Open` to `HalfOpen`
    /// once the open timeout has elapsed, and admits at most one probe at a
    /// time while half-open.
    pub fn try_acquire(&self) -> Permit {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed => Permit::Allowed,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= Duration::from_millis(self.config.open_timeout_ms) {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_successes = 0;
                    inner.probe_in_flight = true;
                    Permit::AllowedAsProbe
                } else {
                    Permit::Rejected
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Permit::Rejected
                } else {
                    inner.probe_in_flight = true;
                    Permit::AllowedAsProbe
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.failure_timestamps.clear();
            }
            BreakerState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.probe_successes += 1;
                if inner.probe_successes >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failure_timestamps.clear();
                    inner.opened_at = None;
                    inner.probe_successes = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed => {
                let now = Instant::now();
                let window = Duration::from_millis(self.config.time_window_ms);
                inner.failure_timestamps.retain(|t| now.duration_since(*t) <= window);
                inner.failure_timestamps.push(now);
                if inner.failure_timestamps.len() as u32 >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    inner.failure_timestamps.clear();
                }
            }
            BreakerState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_successes = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Forces a specific state, bypassing the normal transition rules. Exists
    /// for tests that need to exercise `Open`/`HalfOpen` behavior directly.
    pub fn force_state(&self, state: BreakerState) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.state = state;
        if state == BreakerState::Open {
            inner.opened_at = Some(Instant::now());
        }
        if state == BreakerState::HalfOpen {
            inner.probe_in_flight = false;
            inner.probe_successes = 0;
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.state = BreakerState::Closed;
        inner.failure_timestamps.clear();
        inner.opened_at = None;
        inner.probe_successes = 0;
        inner.probe_in_flight = false;
    }
}
