//! # Pricefeed Configuration
//!
//! Typed configuration for the store tiers, the circuit breaker guarding the
//! cache, and the ingestion pipeline. Values are loaded once at startup by
//! [`ConfigManager`] and never mutated afterwards; workers receive their share
//! by value.
//!
//! ## Layout
//!
//! ```toml
//! [store.cache]            # fast tier (redis | memory | none)
//! [store.durable]          # authoritative tier (postgres | memory | none)
//! [store.health]           # probe timeout, snapshot cache TTL
//! [circuit_breaker]        # cache tier fail-fast behavior
//! [pipeline]               # worker count, batch size, currency, backoff
//! [chunk_source]           # work endpoint and its shared secret
//! [price_api]              # price lookup endpoint used inside workers
//! ```
//!
//! Every section has defaults, so a partial file (or none at all) is valid.

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::resilience::CircuitBreakerConfig;

const CACHE_BACKENDS: &[&str] = &["redis", "dragonfly", "memory", "none"];
const DURABLE_BACKENDS: &[&str] = &["postgres", "postgresql", "memory", "none"];

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricefeedConfig {
    pub store: StoreConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub pipeline: PipelineConfig,
    pub chunk_source: ChunkSourceConfig,
    pub price_api: PriceApiConfig,
}

impl PricefeedConfig {
    /// Reject values that would make the store or the pipeline misbehave
    pub fn validate(&self) -> ConfigResult<()> {
        let cache_backend = self.store.cache.backend.to_ascii_lowercase();
        if !CACHE_BACKENDS.contains(&cache_backend.as_str()) {
            return Err(ConfigurationError::invalid_value(
                "store.cache.backend",
                format!("'{}' is not one of {:?}", self.store.cache.backend, CACHE_BACKENDS),
            ));
        }

        let durable_backend = self.store.durable.backend.to_ascii_lowercase();
        if !DURABLE_BACKENDS.contains(&durable_backend.as_str()) {
            return Err(ConfigurationError::invalid_value(
                "store.durable.backend",
                format!(
                    "'{}' is not one of {:?}",
                    self.store.durable.backend, DURABLE_BACKENDS
                ),
            ));
        }

        if self.store.durable.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "store.durable.max_connections",
                "must be at least 1",
            ));
        }

        if self.store.sync_concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "store.sync_concurrency",
                "must be at least 1",
            ));
        }

        if self.pipeline.worker_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "pipeline.worker_count",
                "must be at least 1",
            ));
        }

        if self.pipeline.items_per_worker == 0 {
            return Err(ConfigurationError::invalid_value(
                "pipeline.items_per_worker",
                "must be at least 1",
            ));
        }

        if self.pipeline.currency.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "pipeline.currency",
                "must not be empty",
            ));
        }

        if self.pipeline.update_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "pipeline.update_attempts",
                "must be at least 1",
            ));
        }

        if self.circuit_breaker.enabled
            && (self.circuit_breaker.failure_threshold == 0
                || self.circuit_breaker.success_threshold == 0)
        {
            return Err(ConfigurationError::invalid_value(
                "circuit_breaker",
                "failure_threshold and success_threshold must be at least 1",
            ));
        }

        Ok(())
    }
}

/// Both store tiers plus health probing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub cache: CacheTierConfig,
    pub durable: DurableTierConfig,
    pub health: HealthConfig,
    /// Keys copied concurrently during reconciliation
    pub sync_concurrency: usize,
    /// Copy durable hits back into the cache on read
    pub backfill_on_read: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache: CacheTierConfig::default(),
            durable: DurableTierConfig::default(),
            health: HealthConfig::default(),
            sync_concurrency: 16,
            backfill_on_read: true,
        }
    }
}

/// Cache tier connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTierConfig {
    /// `redis` (alias `dragonfly`), `memory` or `none`
    pub backend: String,
    /// Connection URL; falls back to `REDIS_URL`
    pub url: Option<String>,
    /// Expiry applied to cached entries; `None` keeps them until overwritten
    pub ttl_seconds: Option<u64>,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for CacheTierConfig {
    fn default() -> Self {
        Self {
            backend: "redis".to_string(),
            url: None,
            ttl_seconds: None,
            connect_timeout_ms: 1000,
            command_timeout_ms: 1000,
        }
    }
}

impl CacheTierConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_seconds.filter(|s| *s > 0).map(Duration::from_secs)
    }
}

/// Durable tier connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurableTierConfig {
    /// `postgres`, `memory` or `none`
    pub backend: String,
    /// Connection URL; falls back to `DATABASE_URL`
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for DurableTierConfig {
    fn default() -> Self {
        Self {
            backend: "postgres".to_string(),
            url: None,
            max_connections: 10,
            acquire_timeout_ms: 3000,
        }
    }
}

impl DurableTierConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Health probing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Deadline for one sentinel round trip
    pub probe_timeout_ms: u64,
    /// How long the read path may reuse a snapshot; 0 probes on every read
    pub snapshot_ttl_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 1500,
            snapshot_ttl_ms: 2000,
        }
    }
}

impl HealthConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_millis(self.snapshot_ttl_ms)
    }
}

/// Circuit breaker settings for the cache tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before probing recovery
    pub timeout_seconds: u64,
    /// Successes in half-open state required to close again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            timeout_seconds: 30,
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_resilience_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: Duration::from_secs(self.timeout_seconds),
            success_threshold: self.success_threshold,
        }
    }
}

/// Ingestion pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of concurrent lanes
    pub worker_count: usize,
    /// Upper bound on items in one chunk
    pub items_per_worker: usize,
    pub currency: String,
    /// Pause after an empty chunk or a failed fetch
    pub empty_backoff_seconds: u64,
    /// Kill a worker that runs longer than this; `None` waits indefinitely
    pub worker_timeout_seconds: Option<u64>,
    /// Worker executable; defaults to `price_worker` next to the running binary
    pub worker_program: Option<PathBuf>,
    /// Optimistic retries when merging prices into the shared index
    pub update_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            items_per_worker: 50,
            currency: "USD".to_string(),
            empty_backoff_seconds: 30,
            worker_timeout_seconds: Some(600),
            worker_program: None,
            update_attempts: 5,
        }
    }
}

impl PipelineConfig {
    pub fn empty_backoff(&self) -> Duration {
        Duration::from_secs(self.empty_backoff_seconds)
    }

    pub fn worker_timeout(&self) -> Option<Duration> {
        self.worker_timeout_seconds
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

/// Work endpoint handing out chunks of item names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkSourceConfig {
    pub base_url: String,
    /// Bearer token shared with the endpoint
    pub secret: Option<String>,
    /// Ask for items even if they were refreshed recently
    pub force: bool,
    pub timeout_ms: u64,
}

impl Default for ChunkSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api/prices".to_string(),
            secret: None,
            force: false,
            timeout_ms: 10000,
        }
    }
}

/// Price lookup endpoint used by workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    /// Pause between consecutive lookups inside one worker
    pub request_delay_ms: u64,
}

impl Default for PriceApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api/market".to_string(),
            api_key: None,
            timeout_ms: 10000,
            request_delay_ms: 0,
        }
    }
}
