//! Tier backend selection
//!
//! Uses enum dispatch so `DualStore`, `StoreHealth` and `Reconciler` share one
//! concrete type per tier without boxing futures. A tier that is switched off
//! or cannot be configured becomes `TierBackend::Unconfigured`, which fails
//! every operation with `TierError::NotConfigured`; the process still starts.

use super::errors::{TierError, TierResult};
use super::providers::{InMemoryTier, PostgresTier, RedisTier};
use super::tier::{StoreTier, TierKind};
use crate::config::StoreConfig;
use std::sync::Arc;
use tracing::{info, warn};

/// One tier's backend
#[derive(Debug, Clone)]
pub enum TierBackend {
    /// Redis or Dragonfly (boxed to reduce enum size)
    Redis(Box<RedisTier>),

    /// PostgreSQL (boxed to reduce enum size)
    Postgres(Box<PostgresTier>),

    /// In-process map
    Memory(InMemoryTier),

    /// Disabled or misconfigured tier
    Unconfigured { kind: TierKind, reason: String },
}

impl TierBackend {
    pub fn unconfigured(kind: TierKind, reason: impl Into<String>) -> Self {
        Self::Unconfigured {
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !matches!(self, Self::Unconfigured { .. })
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Redis(t) => t.provider_name(),
            Self::Postgres(t) => t.provider_name(),
            Self::Memory(t) => t.provider_name(),
            Self::Unconfigured { .. } => "none",
        }
    }

    pub async fn get(&self, key: &str) -> TierResult<Option<String>> {
        match self {
            Self::Redis(t) => t.get(key).await,
            Self::Postgres(t) => t.get(key).await,
            Self::Memory(t) => t.get(key).await,
            Self::Unconfigured { kind, reason } => Err(not_configured(*kind, reason)),
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> TierResult<()> {
        match self {
            Self::Redis(t) => t.set(key, value).await,
            Self::Postgres(t) => t.set(key, value).await,
            Self::Memory(t) => t.set(key, value).await,
            Self::Unconfigured { kind, reason } => Err(not_configured(*kind, reason)),
        }
    }

    pub async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> TierResult<bool> {
        match self {
            Self::Redis(t) => t.compare_and_set(key, expected, value).await,
            Self::Postgres(t) => t.compare_and_set(key, expected, value).await,
            Self::Memory(t) => t.compare_and_set(key, expected, value).await,
            Self::Unconfigured { kind, reason } => Err(not_configured(*kind, reason)),
        }
    }

    pub async fn keys(&self) -> TierResult<Vec<String>> {
        match self {
            Self::Redis(t) => t.keys().await,
            Self::Postgres(t) => t.keys().await,
            Self::Memory(t) => t.keys().await,
            Self::Unconfigured { kind, reason } => Err(not_configured(*kind, reason)),
        }
    }

    async fn close(&self) {
        if let Self::Postgres(t) = self {
            t.close().await;
        }
    }

    fn cache_from_config(config: &StoreConfig) -> Self {
        let cache = &config.cache;
        match cache.backend.to_ascii_lowercase().as_str() {
            // Dragonfly speaks the Redis protocol
            "redis" | "dragonfly" => match RedisTier::from_config(cache) {
                Ok(tier) => {
                    info!(backend = "redis", "Cache tier initialized");
                    Self::Redis(Box::new(tier))
                }
                Err(e) => {
                    warn!(error = %e, "Cache tier unavailable, continuing without it");
                    Self::unconfigured(TierKind::Cache, e.to_string())
                }
            },
            "memory" => {
                info!(backend = "memory", "Cache tier initialized");
                Self::Memory(InMemoryTier::new())
            }
            "none" => {
                info!("Cache tier disabled by configuration");
                Self::unconfigured(TierKind::Cache, "disabled by configuration")
            }
            other => {
                warn!(backend = other, "Unknown cache backend, continuing without cache");
                Self::unconfigured(TierKind::Cache, format!("unknown backend '{other}'"))
            }
        }
    }

    fn durable_from_config(config: &StoreConfig) -> Self {
        let durable = &config.durable;
        match durable.backend.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => match PostgresTier::from_config(durable) {
                Ok(tier) => {
                    info!(backend = "postgres", "Durable tier initialized");
                    Self::Postgres(Box::new(tier))
                }
                Err(e) => {
                    warn!(error = %e, "Durable tier unavailable, writes will fail");
                    Self::unconfigured(TierKind::Durable, e.to_string())
                }
            },
            "memory" => {
                warn!(
                    backend = "memory",
                    "Durable tier is in-process; data will not survive a restart"
                );
                Self::Memory(InMemoryTier::new())
            }
            "none" => {
                warn!("Durable tier disabled by configuration, writes will fail");
                Self::unconfigured(TierKind::Durable, "disabled by configuration")
            }
            other => {
                warn!(backend = other, "Unknown durable backend");
                Self::unconfigured(TierKind::Durable, format!("unknown backend '{other}'"))
            }
        }
    }
}

fn not_configured(kind: TierKind, reason: &str) -> TierError {
    TierError::NotConfigured {
        tier: kind,
        reason: reason.to_string(),
    }
}

/// Both tier clients, shared by every store component of a process
///
/// Built once at startup and passed around behind an `Arc`.
#[derive(Debug, Clone)]
pub struct TierClients {
    cache: TierBackend,
    durable: TierBackend,
}

impl TierClients {
    pub fn new(cache: TierBackend, durable: TierBackend) -> Self {
        Self { cache, durable }
    }

    /// Build clients from configuration without connecting
    ///
    /// Must be called within a Tokio runtime when the durable tier is
    /// PostgreSQL.
    pub fn from_config(config: &StoreConfig) -> Arc<Self> {
        Arc::new(Self {
            cache: TierBackend::cache_from_config(config),
            durable: TierBackend::durable_from_config(config),
        })
    }

    /// Two independent in-process tiers
    pub fn in_memory() -> (Arc<Self>, InMemoryTier, InMemoryTier) {
        let cache = InMemoryTier::new();
        let durable = InMemoryTier::new();
        let clients = Arc::new(Self::new(
            TierBackend::Memory(cache.clone()),
            TierBackend::Memory(durable.clone()),
        ));
        (clients, cache, durable)
    }

    pub fn cache(&self) -> &TierBackend {
        &self.cache
    }

    pub fn durable(&self) -> &TierBackend {
        &self.durable
    }

    pub fn tier(&self, kind: TierKind) -> &TierBackend {
        match kind {
            TierKind::Cache => &self.cache,
            TierKind::Durable => &self.durable,
        }
    }

    /// Release pooled connections
    pub async fn close(&self) {
        self.cache.close().await;
        self.durable.close().await;
    }
}
