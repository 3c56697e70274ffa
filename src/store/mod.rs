//! # Store
//!
//! Dual-tier persistence: a fast, non-authoritative cache tier (Redis)
//! fronting an authoritative durable tier (PostgreSQL).
//!
//! - [`StoreHealth`] probes each tier without ever failing
//! - [`DualStore`] routes reads and writes and reports partial failures
//! - [`Reconciler`] copies the durable tier into the cache after an outage
//!
//! All three share one [`TierClients`] built at startup and passed in
//! explicitly; nothing in this module holds process-wide state.
//!
//! ```rust
//! use pricefeed_core::config::{CircuitBreakerSettings, StoreConfig};
//! use pricefeed_core::store::{DualStore, ProUsersKey, TierClients, WriteOutcome};
//!
//! # tokio_test::block_on(async {
//! let (clients, _cache, _durable) = TierClients::in_memory();
//! let store = DualStore::new(clients, &StoreConfig::default(), &CircuitBreakerSettings::default());
//!
//! let outcome = store.set(&ProUsersKey, &vec!["alice".to_string()]).await.unwrap();
//! assert_eq!(outcome, WriteOutcome::Replicated);
//! assert_eq!(store.get(&ProUsersKey).await.unwrap(), Some(vec!["alice".to_string()]));
//! # });
//! ```

pub mod backend;
pub mod dual_store;
pub mod errors;
pub mod health;
pub mod keys;
pub mod providers;
pub mod reconciler;
pub mod tier;

pub use backend::{TierBackend, TierClients};
pub use dual_store::{DualStore, Lookup, UpdateOutcome, WriteOutcome};
pub use errors::{
    FailedTier, PartialFailureError, StoreError, StoreResult, TierError, TierResult,
};
pub use health::{HealthSnapshot, StoreHealth, TierStatus};
pub use keys::{
    JsonKey, MarketPrices, MarketPricesKey, PricePoint, ProUsersKey, StoreKey, TypedKey,
    HEALTH_SENTINEL_KEY,
};
pub use reconciler::{Reconciler, SyncResult};
pub use tier::{StoreTier, TierKind};
