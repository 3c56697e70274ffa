//! # Store Health
//!
//! Answers "is tier X reachable right now?" without ever returning an error.
//! A probe writes a fresh token to the sentinel key and reads it back under a
//! short timeout; anything other than a clean round trip is reported as a
//! non-available [`TierStatus`].
//!
//! Operator and reconciliation paths take a fresh [`StoreHealth::snapshot`].
//! The read path uses [`StoreHealth::cached_snapshot`], which reuses the last
//! result for `snapshot_ttl` so hot reads do not pay for two round trips.

use super::backend::TierClients;
use super::errors::TierError;
use super::keys::HEALTH_SENTINEL_KEY;
use super::tier::TierKind;
use crate::config::HealthConfig;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Reachability of one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TierStatus {
    Available,
    /// Configured but failing right now
    Unavailable { reason: String },
    /// Never set up (missing URL, disabled, unknown backend)
    NotConfigured { reason: String },
}

impl TierStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Available => None,
            Self::Unavailable { reason } | Self::NotConfigured { reason } => Some(reason),
        }
    }

    fn from_error(error: TierError) -> Self {
        match error {
            TierError::NotConfigured { reason, .. } => Self::NotConfigured { reason },
            other => Self::Unavailable {
                reason: other.to_string(),
            },
        }
    }
}

/// Combined reachability of both tiers at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub cache_available: bool,
    pub durable_available: bool,
    pub checked_at: DateTime<Utc>,
    pub cache: TierStatus,
    pub durable: TierStatus,
}

impl HealthSnapshot {
    pub fn new(cache: TierStatus, durable: TierStatus) -> Self {
        Self {
            cache_available: cache.is_available(),
            durable_available: durable.is_available(),
            checked_at: Utc::now(),
            cache,
            durable,
        }
    }

    pub fn status(&self, kind: TierKind) -> &TierStatus {
        match kind {
            TierKind::Cache => &self.cache,
            TierKind::Durable => &self.durable,
        }
    }

    pub fn is_available(&self, kind: TierKind) -> bool {
        self.status(kind).is_available()
    }

    pub fn all_available(&self) -> bool {
        self.cache_available && self.durable_available
    }
}

/// Health prober shared by `DualStore` and `Reconciler`
#[derive(Debug, Clone)]
pub struct StoreHealth {
    clients: Arc<TierClients>,
    probe_timeout: Duration,
    snapshot_ttl: Duration,
    last: Arc<RwLock<Option<(Instant, HealthSnapshot)>>>,
}

impl StoreHealth {
    pub fn new(clients: Arc<TierClients>, config: &HealthConfig) -> Self {
        Self {
            clients,
            probe_timeout: config.probe_timeout(),
            snapshot_ttl: config.snapshot_ttl(),
            last: Arc::new(RwLock::new(None)),
        }
    }

    /// Probe a single tier
    pub async fn probe(&self, kind: TierKind) -> TierStatus {
        let started = Instant::now();
        let status = match tokio::time::timeout(self.probe_timeout, self.round_trip(kind)).await
        {
            Ok(Ok(())) => TierStatus::Available,
            Ok(Err(e)) => TierStatus::from_error(e),
            Err(_) => TierStatus::Unavailable {
                reason: format!(
                    "health probe timed out after {}ms",
                    self.probe_timeout.as_millis()
                ),
            },
        };

        debug!(
            tier = %kind,
            available = status.is_available(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            reason = status.reason().unwrap_or(""),
            "Tier health probe"
        );
        status
    }

    pub async fn is_available(&self, kind: TierKind) -> bool {
        self.probe(kind).await.is_available()
    }

    /// Probe both tiers concurrently and remember the result
    pub async fn snapshot(&self) -> HealthSnapshot {
        let (cache, durable) = tokio::join!(
            self.probe(TierKind::Cache),
            self.probe(TierKind::Durable)
        );
        let snapshot = HealthSnapshot::new(cache, durable);

        if !snapshot.all_available() {
            warn!(
                cache_available = snapshot.cache_available,
                durable_available = snapshot.durable_available,
                "Store degraded"
            );
        }

        *self.last.write() = Some((Instant::now(), snapshot.clone()));
        snapshot
    }

    /// Last snapshot if younger than the snapshot TTL, otherwise a fresh one
    pub async fn cached_snapshot(&self) -> HealthSnapshot {
        if let Some(snapshot) = self.fresh_cached() {
            return snapshot;
        }
        self.snapshot().await
    }

    /// Drop the remembered snapshot so the next read path probes again
    pub fn invalidate(&self) {
        *self.last.write() = None;
    }

    fn fresh_cached(&self) -> Option<HealthSnapshot> {
        let guard = self.last.read();
        match guard.as_ref() {
            Some((taken, snapshot)) if taken.elapsed() < self.snapshot_ttl => {
                Some(snapshot.clone())
            }
            _ => None,
        }
    }

    async fn round_trip(&self, kind: TierKind) -> Result<(), TierError> {
        let tier = self.clients.tier(kind);
        let token = serde_json::Value::String(Uuid::new_v4().to_string()).to_string();

        tier.set(HEALTH_SENTINEL_KEY, &token).await?;
        match tier.get(HEALTH_SENTINEL_KEY).await? {
            // Another process may have probed in between; the tier answered either way
            Some(_) => Ok(()),
            None => Err(TierError::Backend(
                "health sentinel missing immediately after write".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::TierBackend;

    fn health_config(ttl_ms: u64) -> HealthConfig {
        HealthConfig {
            probe_timeout_ms: 500,
            snapshot_ttl_ms: ttl_ms,
        }
    }

    #[tokio::test]
    async fn test_healthy_tiers_report_available() {
        let (clients, cache, durable) = TierClients::in_memory();
        let health = StoreHealth::new(clients, &health_config(0));

        let snapshot = health.snapshot().await;
        assert!(snapshot.all_available());
        assert!(cache.peek(HEALTH_SENTINEL_KEY).is_some());
        assert!(durable.data_keys().is_empty());
    }

    #[tokio::test]
    async fn test_down_and_unconfigured_are_distinct() {
        let (_, cache, _) = TierClients::in_memory();
        cache.set_available(false);
        let clients = Arc::new(TierClients::new(
            TierBackend::Memory(cache),
            TierBackend::unconfigured(TierKind::Durable, "no url"),
        ));
        let health = StoreHealth::new(clients, &health_config(0));

        let snapshot = health.snapshot().await;
        assert!(!snapshot.cache_available);
        assert!(!snapshot.durable_available);
        assert!(matches!(snapshot.cache, TierStatus::Unavailable { .. }));
        assert_eq!(
            snapshot.durable,
            TierStatus::NotConfigured {
                reason: "no url".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_cached_snapshot_reused_within_ttl() {
        let (clients, cache, _) = TierClients::in_memory();
        let health = StoreHealth::new(clients, &health_config(60_000));

        assert!(health.cached_snapshot().await.cache_available);
        cache.set_available(false);
        assert!(health.cached_snapshot().await.cache_available);

        health.invalidate();
        assert!(!health.cached_snapshot().await.cache_available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tier_times_out_as_unavailable() {
        let (clients, _, durable) = TierClients::in_memory();
        durable.set_latency(Duration::from_secs(2));
        let health = StoreHealth::new(clients, &health_config(0));

        let started = tokio::time::Instant::now();
        let snapshot = health.snapshot().await;

        assert!(snapshot.cache_available);
        assert!(!snapshot.durable_available);
        assert!(snapshot
            .durable
            .reason()
            .is_some_and(|r| r.contains("timed out after 500ms")));
        // Bounded by the probe timeout, not the tier latency
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_waits_for_slowest_tier_not_both() {
        let (clients, cache, durable) = TierClients::in_memory();
        // Each check is one write plus one read: 400ms per tier
        cache.set_latency(Duration::from_millis(200));
        durable.set_latency(Duration::from_millis(200));
        let health = StoreHealth::new(clients, &health_config(0));

        let started = tokio::time::Instant::now();
        let snapshot = health.snapshot().await;
        let elapsed = started.elapsed();

        assert!(snapshot.all_available());
        assert!(elapsed >= Duration::from_millis(400));
        assert!(elapsed < Duration::from_millis(800), "probes ran sequentially: {elapsed:?}");
    }

    #[test]
    fn test_status_serializes_with_tag() {
        let json = serde_json::to_value(TierStatus::NotConfigured {
            reason: "missing".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "not_configured");
        assert_eq!(json["reason"], "missing");
    }
}
