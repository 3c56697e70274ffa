//! # Reconciler
//!
//! Bulk copy of every durable record into the cache tier, run by an operator
//! after a cache outage. Both tiers must probe healthy first; otherwise the
//! pass fails before touching a single key. Per-key failures are counted and
//! never abort the pass, and re-running it only overwrites keys with the same
//! values.

use super::backend::TierClients;
use super::errors::{StoreError, StoreResult, TierError};
use super::health::StoreHealth;
use super::keys::is_internal_key;
use super::tier::TierKind;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one reconciliation pass; `total == synced + failed`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub synced: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    clients: Arc<TierClients>,
    health: StoreHealth,
    concurrency: usize,
}

impl Reconciler {
    pub fn new(clients: Arc<TierClients>, health: StoreHealth, concurrency: usize) -> Self {
        Self {
            clients,
            health,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn sync_all(&self) -> StoreResult<SyncResult> {
        let snapshot = self.health.snapshot().await;
        for kind in [TierKind::Durable, TierKind::Cache] {
            let status = snapshot.status(kind);
            if !status.is_available() {
                let reason = status.reason().unwrap_or("unavailable").to_string();
                warn!(tier = %kind, reason = %reason, "Refusing to sync: tier unavailable");
                return Err(StoreError::TierUnavailable { tier: kind, reason });
            }
        }

        let started = Instant::now();
        let keys: Vec<String> = self
            .clients
            .durable()
            .keys()
            .await
            .map_err(|source| StoreError::Enumeration {
                tier: TierKind::Durable,
                source,
            })?
            .into_iter()
            .filter(|k| !is_internal_key(k))
            .collect();

        let total = keys.len();
        info!(total = total, concurrency = self.concurrency, "Starting cache sync");

        let synced = stream::iter(keys)
            .map(|key| async move {
                match self.copy_key(&key).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to sync key");
                        false
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .filter(|ok| futures::future::ready(*ok))
            .count()
            .await;

        let result = SyncResult {
            synced,
            failed: total - synced,
            total,
        };
        info!(
            synced = result.synced,
            failed = result.failed,
            total = result.total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cache sync complete"
        );
        Ok(result)
    }

    async fn copy_key(&self, key: &str) -> Result<(), TierError> {
        let value = self
            .clients
            .durable()
            .get(key)
            .await?
            .ok_or_else(|| TierError::Backend("key vanished before it could be read".to_string()))?;
        self.clients.cache().set(key, &value).await?;
        debug!(key = key, "Key synced");
        Ok(())
    }
}
