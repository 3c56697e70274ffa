//! Shared helpers for integration tests

#![allow(dead_code)]

pub mod launchers;
pub mod sources;
pub mod strategies;

use pricefeed_core::config::{CircuitBreakerSettings, HealthConfig, StoreConfig};
use pricefeed_core::store::providers::InMemoryTier;
use pricefeed_core::store::{DualStore, TierClients};

/// A store over two in-memory tiers the test can break at will
pub struct TestStore {
    pub store: DualStore,
    pub cache: InMemoryTier,
    pub durable: InMemoryTier,
}

/// Store that re-probes health on every read and never trips a breaker,
/// so tier toggles take effect immediately
pub fn memory_store() -> TestStore {
    let (clients, cache, durable) = TierClients::in_memory();
    let config = StoreConfig {
        health: HealthConfig {
            probe_timeout_ms: 500,
            snapshot_ttl_ms: 0,
        },
        ..StoreConfig::default()
    };
    let breaker = CircuitBreakerSettings {
        enabled: false,
        ..CircuitBreakerSettings::default()
    };
    TestStore {
        store: DualStore::new(clients, &config, &breaker),
        cache,
        durable,
    }
}
