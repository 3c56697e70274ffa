//! # Dual Store
//!
//! One read/write API over a cache tier fronting an authoritative durable
//! tier. Tier faults never escape as raw errors: reads fall through to the
//! durable tier and degrade to [`Lookup::Unknown`], writes report exactly which
//! tier missed them.
//!
//! ## Write policy
//!
//! | durable | cache | result                                              |
//! |---------|-------|-----------------------------------------------------|
//! | ok      | ok    | `Ok(WriteOutcome::Replicated)`                      |
//! | ok      | fail  | `Ok(WriteOutcome::CacheStale)`                      |
//! | fail    | ok    | `Err(PartialFailure { tier: FailedTier::Durable })` |
//! | fail    | fail  | `Err(PartialFailure { tier: FailedTier::Both })`    |
//!
//! A cache skipped because it probed unhealthy or its circuit breaker is open
//! counts as a cache failure.
//!
//! ## Concurrency
//!
//! Writes to one key are not ordered; each tier is last-write-wins. Callers
//! that need read-modify-write use [`DualStore::update_with`], whose durable
//! write is conditional on the value it read and retries when another writer
//! got in between.

use super::backend::TierClients;
use super::errors::{
    FailedTier, PartialFailureError, StoreError, StoreResult, TierError, TierResult,
};
use super::health::{HealthSnapshot, StoreHealth};
use super::keys::{JsonKey, StoreKey, TypedKey};
use super::reconciler::{Reconciler, SyncResult};
use super::tier::TierKind;
use crate::config::{CircuitBreakerSettings, StoreConfig};
use crate::resilience::{CircuitBreaker, CircuitBreakerMetrics};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Three-way read result
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    /// Found, with the tier that answered
    Hit { value: V, source: TierKind },
    /// The durable tier answered and holds no such key
    Miss,
    /// Neither tier could answer
    Unknown,
}

impl<V> Lookup<V> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }

    pub fn source(&self) -> Option<TierKind> {
        match self {
            Self::Hit { source, .. } => Some(*source),
            _ => None,
        }
    }

    pub fn into_option(self) -> Option<V> {
        match self {
            Self::Hit { value, .. } => Some(value),
            Self::Miss | Self::Unknown => None,
        }
    }
}

/// Successful write, durably recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// Both tiers hold the new value
    Replicated,
    /// Durable tier holds the new value; the cache may serve an older one
    /// until the next backfill or reconciliation
    CacheStale,
}

impl WriteOutcome {
    pub fn is_cache_stale(&self) -> bool {
        matches!(self, Self::CacheStale)
    }
}

/// Result of a verified read-modify-write
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome<V> {
    /// The value now stored
    pub value: V,
    /// `None` when the update changed nothing and no write was made
    pub write: Option<WriteOutcome>,
    pub attempts: u32,
}

impl<V> UpdateOutcome<V> {
    pub fn is_cache_stale(&self) -> bool {
        self.write.is_some_and(|w| w.is_cache_stale())
    }
}

/// Cache-fronted durable store
#[derive(Debug, Clone)]
pub struct DualStore {
    clients: Arc<TierClients>,
    health: StoreHealth,
    reconciler: Reconciler,
    cache_breaker: Option<Arc<CircuitBreaker>>,
    backfill_on_read: bool,
}

impl DualStore {
    /// Build a store over already constructed tier clients
    pub fn new(
        clients: Arc<TierClients>,
        config: &StoreConfig,
        breaker: &CircuitBreakerSettings,
    ) -> Self {
        let health = StoreHealth::new(clients.clone(), &config.health);
        let reconciler = Reconciler::new(clients.clone(), health.clone(), config.sync_concurrency);

        let cache_breaker = (breaker.enabled && clients.cache().is_configured()).then(|| {
            Arc::new(CircuitBreaker::new(
                "cache_tier".to_string(),
                breaker.to_resilience_config(),
            ))
        });

        Self {
            clients,
            health,
            reconciler,
            cache_breaker,
            backfill_on_read: config.backfill_on_read,
        }
    }

    /// Build tier clients from configuration and wrap them
    ///
    /// Never fails: unreachable or unconfigured tiers surface through health
    /// checks and write results instead.
    pub fn connect(config: &StoreConfig, breaker: &CircuitBreakerSettings) -> Self {
        let clients = TierClients::from_config(config);
        let store = Self::new(clients, config, breaker);
        info!(
            cache = store.clients.cache().provider_name(),
            durable = store.clients.durable().provider_name(),
            "Dual store ready"
        );
        store
    }

    /// Release tier connections
    pub async fn close(&self) {
        self.clients.close().await;
        debug!("Dual store closed");
    }

    pub fn clients(&self) -> &Arc<TierClients> {
        &self.clients
    }

    pub fn health(&self) -> &StoreHealth {
        &self.health
    }

    /// Counters of the cache tier's circuit breaker, `None` when disabled
    pub fn cache_breaker_metrics(&self) -> Option<CircuitBreakerMetrics> {
        self.cache_breaker.as_ref().map(|cb| cb.metrics())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read a value, allowing the cache to answer
    ///
    /// `None` covers both a genuinely absent key and both tiers being down;
    /// use [`DualStore::lookup`] to tell them apart.
    pub async fn get<K: TypedKey>(&self, key: &K) -> StoreResult<Option<K::Value>> {
        self.get_with(key, true).await
    }

    pub async fn get_with<K: TypedKey>(
        &self,
        key: &K,
        allow_stale_cache: bool,
    ) -> StoreResult<Option<K::Value>> {
        let lookup = self.lookup(key, allow_stale_cache).await?;
        if matches!(lookup, Lookup::Unknown) {
            warn!(key = %key.store_key(), "Value unknown: no tier could answer");
        }
        Ok(lookup.into_option())
    }

    /// Read a value and report which tier answered
    ///
    /// Returns `Err(SchemaMismatch)` only when the authoritative copy does not
    /// decode; an undecodable cached copy is skipped.
    pub async fn lookup<K: TypedKey>(
        &self,
        key: &K,
        allow_stale_cache: bool,
    ) -> StoreResult<Lookup<K::Value>> {
        let store_key = key.store_key();
        let key_str = store_key.as_str();

        if allow_stale_cache && self.cache_usable().await {
            match self.cache_get(key_str).await {
                Ok(Some(raw)) => match decode::<K::Value>(key_str, &raw) {
                    Ok(value) => {
                        debug!(key = key_str, "Served from cache");
                        return Ok(Lookup::Hit {
                            value,
                            source: TierKind::Cache,
                        });
                    }
                    Err(e) => {
                        warn!(key = key_str, error = %e, "Ignoring undecodable cached value");
                    }
                },
                Ok(None) => debug!(key = key_str, "Cache miss"),
                Err(e) => log_cache_error(key_str, "read", &e),
            }
        }

        match self.clients.durable().get(key_str).await {
            Ok(Some(raw)) => {
                let value = decode::<K::Value>(key_str, &raw)?;
                if self.backfill_on_read {
                    self.backfill(key_str, &raw).await;
                }
                Ok(Lookup::Hit {
                    value,
                    source: TierKind::Durable,
                })
            }
            Ok(None) => Ok(Lookup::Miss),
            Err(e) => {
                warn!(key = key_str, error = %e, "Durable read failed");
                self.health.invalidate();
                Ok(Lookup::Unknown)
            }
        }
    }

    /// Untyped read for operator tooling
    pub async fn get_raw(&self, key: &StoreKey) -> StoreResult<Option<serde_json::Value>> {
        self.get(&JsonKey(key.clone())).await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write durable first, then mirror to the cache
    pub async fn set<K: TypedKey>(&self, key: &K, value: &K::Value) -> StoreResult<WriteOutcome> {
        let store_key = key.store_key();
        let key_str = store_key.as_str();
        let encoded = serde_json::to_string(value).map_err(|e| StoreError::Serialization {
            key: key_str.to_string(),
            reason: e.to_string(),
        })?;

        let durable = self.clients.durable().set(key_str, &encoded).await;
        let cache = if self.cache_usable().await {
            self.cache_set(key_str, &encoded).await
        } else {
            Err(TierError::Unavailable(
                "cache skipped: unhealthy or circuit open".to_string(),
            ))
        };

        match (durable, cache) {
            (Ok(()), Ok(())) => {
                debug!(key = key_str, "Write replicated to both tiers");
                Ok(WriteOutcome::Replicated)
            }
            (Ok(()), Err(e)) => {
                log_cache_error(key_str, "write", &e);
                Ok(WriteOutcome::CacheStale)
            }
            (Err(durable_err), Ok(())) => {
                warn!(
                    key = key_str,
                    error = %durable_err,
                    "Durable write failed; value only visible in cache"
                );
                self.health.invalidate();
                Err(PartialFailureError {
                    key: key_str.to_string(),
                    tier: FailedTier::Durable,
                    reason: durable_err.to_string(),
                }
                .into())
            }
            (Err(durable_err), Err(cache_err)) => {
                warn!(
                    key = key_str,
                    durable_error = %durable_err,
                    cache_error = %cache_err,
                    "Write failed on both tiers"
                );
                self.health.invalidate();
                Err(PartialFailureError {
                    key: key_str.to_string(),
                    tier: FailedTier::Both,
                    reason: format!("durable: {durable_err}; cache: {cache_err}"),
                }
                .into())
            }
        }
    }

    /// Untyped write for operator tooling
    pub async fn set_raw(
        &self,
        key: &StoreKey,
        value: &serde_json::Value,
    ) -> StoreResult<WriteOutcome> {
        self.set(&JsonKey(key.clone()), value).await
    }

    /// Optimistic read-modify-write against the durable tier
    ///
    /// Reads the authoritative value (or `Default` when absent), applies `f`
    /// and writes the result with a conditional write that only lands if the
    /// durable tier still holds what was read. When another writer got in
    /// first, starts over, up to `max_attempts` times. The cache is mirrored
    /// only after the durable write succeeded.
    pub async fn update_with<K, F>(
        &self,
        key: &K,
        max_attempts: u32,
        mut f: F,
    ) -> StoreResult<UpdateOutcome<K::Value>>
    where
        K: TypedKey,
        K::Value: Default + Clone + PartialEq,
        F: FnMut(&mut K::Value),
    {
        let store_key = key.store_key();
        let key_str = store_key.as_str();
        let max_attempts = max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let raw = self.read_durable_raw(&store_key).await?;
            let current: Option<K::Value> =
                raw.as_deref().map(|r| decode(key_str, r)).transpose()?;
            let mut next = current.clone().unwrap_or_default();
            f(&mut next);

            if current.as_ref() == Some(&next) {
                return Ok(UpdateOutcome {
                    value: next,
                    write: None,
                    attempts: attempt,
                });
            }

            let encoded = serde_json::to_string(&next).map_err(|e| StoreError::Serialization {
                key: key_str.to_string(),
                reason: e.to_string(),
            })?;

            let swapped = self
                .clients
                .durable()
                .compare_and_set(key_str, raw.as_deref(), &encoded)
                .await
                .map_err(|e| {
                    warn!(key = key_str, error = %e, "Durable conditional write failed");
                    self.health.invalidate();
                    StoreError::TierUnavailable {
                        tier: TierKind::Durable,
                        reason: e.to_string(),
                    }
                })?;

            if !swapped {
                debug!(
                    key = key_str,
                    attempt = attempt,
                    "Concurrent writer replaced value, retrying"
                );
                continue;
            }

            let write = if self.cache_usable().await {
                match self.cache_set(key_str, &encoded).await {
                    Ok(()) => WriteOutcome::Replicated,
                    Err(e) => {
                        log_cache_error(key_str, "update", &e);
                        WriteOutcome::CacheStale
                    }
                }
            } else {
                debug!(key = key_str, "Cache skipped for update");
                WriteOutcome::CacheStale
            };

            debug!(key = key_str, attempt = attempt, "Update committed");
            return Ok(UpdateOutcome {
                value: next,
                write: Some(write),
                attempts: attempt,
            });
        }

        Err(StoreError::UpdateConflict {
            key: store_key.to_string(),
            attempts: max_attempts,
        })
    }

    // =========================================================================
    // Operator contract
    // =========================================================================

    /// Freshly probed health of both tiers
    pub async fn check_health(&self) -> HealthSnapshot {
        self.health.snapshot().await
    }

    /// Copy every durable record into the cache
    pub async fn sync_all(&self) -> StoreResult<SyncResult> {
        let result = self.reconciler.sync_all().await?;
        // The cache just proved itself; stop failing fast
        if let Some(cb) = &self.cache_breaker {
            cb.force_closed();
        }
        Ok(result)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn read_durable_raw(&self, key: &StoreKey) -> StoreResult<Option<String>> {
        self.clients
            .durable()
            .get(key.as_str())
            .await
            .map_err(|e| StoreError::TierUnavailable {
                tier: TierKind::Durable,
                reason: e.to_string(),
            })
    }

    async fn cache_usable(&self) -> bool {
        if !self.clients.cache().is_configured() {
            return false;
        }
        if !self.health.cached_snapshot().await.cache_available {
            return false;
        }
        self.cache_breaker
            .as_ref()
            .map_or(true, |cb| cb.should_allow())
    }

    async fn cache_get(&self, key: &str) -> TierResult<Option<String>> {
        let started = Instant::now();
        let result = self.clients.cache().get(key).await;
        self.record_cache_outcome(started, result.is_ok());
        result
    }

    async fn cache_set(&self, key: &str, value: &str) -> TierResult<()> {
        let started = Instant::now();
        let result = self.clients.cache().set(key, value).await;
        self.record_cache_outcome(started, result.is_ok());
        result
    }

    fn record_cache_outcome(&self, started: Instant, ok: bool) {
        if let Some(cb) = &self.cache_breaker {
            if ok {
                cb.record_success(started.elapsed());
            } else {
                cb.record_failure(started.elapsed());
            }
        }
    }

    async fn backfill(&self, key: &str, raw: &str) {
        if !self.cache_usable().await {
            return;
        }
        match self.cache_set(key, raw).await {
            Ok(()) => debug!(key = key, "Backfilled cache from durable tier"),
            Err(e) => log_cache_error(key, "backfill", &e),
        }
    }
}

fn decode<V: DeserializeOwned>(key: &str, raw: &str) -> StoreResult<V> {
    serde_json::from_str(raw).map_err(|e| StoreError::SchemaMismatch {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn log_cache_error(key: &str, operation: &str, error: &TierError) {
    if error.is_not_configured() {
        debug!(key = key, operation = operation, "Cache tier not configured");
    } else {
        warn!(key = key, operation = operation, error = %error, "Cache tier operation failed");
    }
}
