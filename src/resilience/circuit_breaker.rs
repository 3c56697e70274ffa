//! # Circuit Breaker
//!
//! Classic three-state breaker (Closed, Open, HalfOpen) with lock-free state
//! and counters. Callers ask `should_allow` before a call and report back with
//! `record_success`/`record_failure`, since what counts as a failure depends on
//! the caller. While half-open, at most `success_threshold` trial calls are in
//! flight at once.

use super::{CircuitBreakerConfig, CircuitBreakerMetrics};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Operational mode of a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through
    Closed = 0,
    /// Calls are rejected without being attempted
    Open = 1,
    /// A limited number of probe calls are allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Closed,
            2 => Self::HalfOpen,
            _ => Self::Open,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    consecutive_failures: AtomicU64,
    half_open_successes: AtomicU64,
    half_open_in_flight: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl Counters {
    fn record(&self, duration: Duration, success: bool) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }
}

/// Lock-free circuit breaker shared behind an `Arc`
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    state: AtomicU8,
    config: CircuitBreakerConfig,
    counters: Counters,
    /// Epoch nanos when the circuit last opened, 0 while closed
    opened_at_nanos: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            timeout_seconds = config.timeout.as_secs(),
            success_threshold = config.success_threshold,
            "Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            counters: Counters::default(),
            opened_at_nanos: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Whether a call may be attempted now
    ///
    /// An open circuit whose timeout has elapsed moves to half-open here. Every
    /// `true` must be followed by `record_success` or `record_failure`.
    pub fn should_allow(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened = self.opened_at_nanos.load(Ordering::Acquire);
                let elapsed = epoch_nanos_now().saturating_sub(opened);
                if opened != 0 && elapsed < self.config.timeout.as_nanos() as u64 {
                    return false;
                }
                self.transition_to_half_open();
                self.claim_half_open_slot()
            }
            CircuitState::HalfOpen => self.claim_half_open_slot(),
        }
    }

    /// Claim one of the half-open trial slots
    fn claim_half_open_slot(&self) -> bool {
        let limit = u64::from(self.config.success_threshold.max(1));
        let successes = self.counters.half_open_successes.load(Ordering::Acquire);
        self.counters
            .half_open_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_flight| {
                (in_flight + successes < limit).then_some(in_flight + 1)
            })
            .is_ok()
    }

    pub fn record_success(&self, duration: Duration) {
        self.counters.record(duration, true);
        match self.state() {
            CircuitState::Closed => {
                self.counters.consecutive_failures.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                self.release_half_open_slot();
                let successes = self
                    .counters
                    .half_open_successes
                    .fetch_add(1, Ordering::Relaxed)
                    + 1;
                if successes >= u64::from(self.config.success_threshold) {
                    self.transition_to_closed();
                }
            }
            CircuitState::Open => {
                debug!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    pub fn record_failure(&self, duration: Duration) {
        self.counters.record(duration, false);
        match self.state() {
            CircuitState::Closed => {
                let failures = self
                    .counters
                    .consecutive_failures
                    .fetch_add(1, Ordering::Relaxed)
                    + 1;
                debug!(
                    component = %self.name,
                    consecutive_failures = failures,
                    "Operation failed"
                );
                if failures >= u64::from(self.config.failure_threshold) {
                    self.transition_to_open();
                }
            }
            // A failed probe reopens immediately
            CircuitState::HalfOpen => self.transition_to_open(),
            CircuitState::Open => {}
        }
    }

    pub fn force_closed(&self) {
        if self.state() != CircuitState::Closed {
            info!(component = %self.name, "Circuit breaker forced closed");
        }
        self.transition_to_closed();
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let total_calls = self.counters.total_calls.load(Ordering::Relaxed);
        let success_count = self.counters.success_count.load(Ordering::Relaxed);
        let failure_count = self.counters.failure_count.load(Ordering::Relaxed);
        let total_nanos = self.counters.total_duration_nanos.load(Ordering::Relaxed);

        let (failure_rate, average_duration) = if total_calls > 0 {
            (
                failure_count as f64 / total_calls as f64,
                Duration::from_nanos(total_nanos / total_calls),
            )
        } else {
            (0.0, Duration::ZERO)
        };

        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            consecutive_failures: self.counters.consecutive_failures.load(Ordering::Relaxed),
            current_state: self.state(),
            failure_rate,
            average_duration,
        }
    }

    fn release_half_open_slot(&self) {
        let _ = self.counters.half_open_in_flight.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |in_flight| Some(in_flight.saturating_sub(1)),
        );
    }

    fn transition_to_closed(&self) {
        self.counters.consecutive_failures.store(0, Ordering::Relaxed);
        self.counters.half_open_successes.store(0, Ordering::Relaxed);
        self.counters.half_open_in_flight.store(0, Ordering::Release);
        self.opened_at_nanos.store(0, Ordering::Release);
        let previous = self
            .state
            .swap(CircuitState::Closed as u8, Ordering::AcqRel);

        if CircuitState::from(previous) != CircuitState::Closed {
            info!(component = %self.name, "Circuit breaker closed (recovered)");
        }
    }

    fn transition_to_open(&self) {
        self.opened_at_nanos
            .store(epoch_nanos_now(), Ordering::Release);
        self.counters.half_open_successes.store(0, Ordering::Relaxed);
        self.counters.half_open_in_flight.store(0, Ordering::Release);
        self.state.store(CircuitState::Open as u8, Ordering::Release);

        warn!(
            component = %self.name,
            consecutive_failures = self.counters.consecutive_failures.load(Ordering::Relaxed),
            timeout_seconds = self.config.timeout.as_secs(),
            "Circuit breaker opened (failing fast)"
        );
    }

    fn transition_to_half_open(&self) {
        // Only the caller that wins the swap resets the half-open counters
        if self
            .state
            .compare_exchange(
                CircuitState::Open as u8,
                CircuitState::HalfOpen as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.counters.half_open_successes.store(0, Ordering::Release);
            self.counters.half_open_in_flight.store(0, Ordering::Release);
            info!(component = %self.name, "Circuit breaker half-open (testing recovery)");
        }
    }
}

fn epoch_nanos_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}
