//! # Typed Key Registry
//!
//! Every logical record in the store is addressed by a `StoreKey` and bound to
//! exactly one Rust type through `TypedKey`. `DualStore` serializes and
//! validates values against that type, so a record with an unexpected shape is
//! rejected at the store boundary instead of surfacing deep inside a caller.
//!
//! | Key                          | Type                              |
//! |------------------------------|-----------------------------------|
//! | `pro_users`                  | `Vec<String>`                     |
//! | `market_prices:<currency>`   | `BTreeMap<String, PricePoint>`    |
//!
//! `JsonKey` is the escape hatch for operator tooling that needs to read any
//! record without knowing its schema.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key written by health probes; never reconciled or exposed
pub const HEALTH_SENTINEL_KEY: &str = "__pricefeed_health__";

const INTERNAL_KEY_PREFIX: &str = "__pricefeed";

/// Whether a key belongs to the store's own bookkeeping
pub fn is_internal_key(key: &str) -> bool {
    key.starts_with(INTERNAL_KEY_PREFIX)
}

/// Opaque identifier of a logical record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreKey(String);

impl StoreKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoreKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for StoreKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Binds a key to the one type stored under it
pub trait TypedKey: Send + Sync {
    type Value: Serialize + DeserializeOwned + Send + Sync;

    fn store_key(&self) -> StoreKey;
}

/// Usernames with an active pro subscription
#[derive(Debug, Clone, Copy, Default)]
pub struct ProUsersKey;

impl TypedKey for ProUsersKey {
    type Value = Vec<String>;

    fn store_key(&self) -> StoreKey {
        StoreKey::new("pro_users")
    }
}

/// Latest observed price of one market item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

/// Price index for one currency, keyed by market hash name
pub type MarketPrices = BTreeMap<String, PricePoint>;

/// Price index of a single currency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketPricesKey {
    currency: String,
}

impl MarketPricesKey {
    /// Currency codes are normalized to upper case so `usd` and `USD` share a record
    pub fn new(currency: &str) -> Self {
        Self {
            currency: currency.trim().to_ascii_uppercase(),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }
}

impl TypedKey for MarketPricesKey {
    type Value = MarketPrices;

    fn store_key(&self) -> StoreKey {
        StoreKey::new(format!("market_prices:{}", self.currency))
    }
}

/// Untyped access to any record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonKey(pub StoreKey);

impl TypedKey for JsonKey {
    type Value = serde_json::Value;

    fn store_key(&self) -> StoreKey {
        self.0.clone()
    }
}
