//! Tier trait shared by the cache and durable backends

use super::errors::TierResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two tiers composing a `DualStore`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    /// Fast, non-authoritative store (Redis)
    Cache,
    /// Authoritative store (PostgreSQL)
    Durable,
}

impl TierKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Durable => "durable",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations every tier backend provides
///
/// Values cross this boundary as JSON documents; typing happens in
/// `DualStore` against the key registry.
pub trait StoreTier: Send + Sync {
    /// Read a value. `Ok(None)` means the key is absent.
    fn get(&self, key: &str)
        -> impl std::future::Future<Output = TierResult<Option<String>>> + Send;

    /// Write a value, overwriting any previous one
    fn set(&self, key: &str, value: &str)
        -> impl std::future::Future<Output = TierResult<()>> + Send;

    /// Write `value` only if the key still holds `expected`
    ///
    /// `expected == None` means the key must be absent. Returns `Ok(false)`
    /// when another writer changed the key first; nothing is written then.
    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> impl std::future::Future<Output = TierResult<bool>> + Send;

    /// Enumerate every key held by the tier
    fn keys(&self) -> impl std::future::Future<Output = TierResult<Vec<String>>> + Send;

    /// Name of the backend implementation
    fn provider_name(&self) -> &'static str;
}
