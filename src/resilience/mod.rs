//! # Resilience
//!
//! Circuit breaking for calls that cross the network: the cache tier in
//! `DualStore` and the market price API in workers. A breaker that trips stops
//! repeated timeout penalties while a dependency is down and lets a few probe
//! calls through once `timeout` has elapsed.
//!
//! ```rust
//! use pricefeed_core::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     "cache".to_string(),
//!     CircuitBreakerConfig {
//!         failure_threshold: 2,
//!         timeout: Duration::from_secs(30),
//!         success_threshold: 1,
//!     },
//! );
//!
//! breaker.record_failure(Duration::from_millis(5));
//! breaker.record_failure(Duration::from_millis(5));
//! assert_eq!(breaker.state(), CircuitState::Open);
//! assert!(!breaker.should_allow());
//! ```

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitState};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thresholds for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Time spent open before probe calls are allowed
    pub timeout: Duration,

    /// Successful probes needed to close the circuit again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Point-in-time view of a breaker's counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u64,
    pub current_state: CircuitState,
    pub failure_rate: f64,
    pub average_duration: Duration,
}
