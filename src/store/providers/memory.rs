//! In-process tier backed by `DashMap`
//!
//! Used for local development and for exercising degraded-tier behavior in
//! tests: availability can be toggled, writes to chosen keys can be made
//! to fail and every operation can be slowed down. State is shared between clones, so a test can keep a handle while
//! the store owns another.

use crate::store::errors::{TierError, TierResult};
use crate::store::keys::is_internal_key;
use crate::store::tier::StoreTier;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
struct MemoryState {
    entries: DashMap<String, String>,
    available: AtomicBool,
    failing_keys: DashSet<String>,
    writes: AtomicU64,
    latency_ms: AtomicU64,
}

/// In-memory tier with fault injection
#[derive(Debug, Clone)]
pub struct InMemoryTier {
    state: Arc<MemoryState>,
}

impl Default for InMemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTier {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MemoryState {
                entries: DashMap::new(),
                available: AtomicBool::new(true),
                failing_keys: DashSet::new(),
                writes: AtomicU64::new(0),
                latency_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Mark the tier reachable or unreachable; every operation fails while down
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::Release);
        debug!(available = available, "In-memory tier availability changed");
    }

    pub fn is_available(&self) -> bool {
        self.state.available.load(Ordering::Acquire)
    }

    /// Make every write to `key` fail until `clear_write_failures` is called
    pub fn fail_writes_for(&self, key: &str) {
        self.state.failing_keys.insert(key.to_string());
    }

    pub fn clear_write_failures(&self) {
        self.state.failing_keys.clear();
    }

    /// Delay every tier operation by `latency` before it runs
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.state.latency_ms.store(millis, Ordering::Release);
    }

    /// Raw value stored under `key`, bypassing availability
    pub fn peek(&self, key: &str) -> Option<String> {
        self.state.entries.get(key).map(|v| v.value().clone())
    }

    /// Write directly, bypassing availability and injected failures
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.state
            .entries
            .insert(key.to_string(), value.to_string());
    }

    /// Keys holding caller data (health sentinel excluded), sorted
    pub fn data_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| !is_internal_key(k))
            .collect();
        keys.sort();
        keys
    }

    /// Number of successful writes, sentinel writes included
    pub fn write_count(&self) -> u64 {
        self.state.writes.load(Ordering::Relaxed)
    }

    async fn simulate_latency(&self) {
        let millis = self.state.latency_ms.load(Ordering::Acquire);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    fn ensure_writable(&self, key: &str) -> TierResult<()> {
        self.ensure_available()?;
        if self.state.failing_keys.contains(key) {
            return Err(TierError::Backend(format!(
                "injected write failure for '{key}'"
            )));
        }
        Ok(())
    }

    fn ensure_available(&self) -> TierResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(TierError::Unavailable(
                "in-memory tier marked unavailable".to_string(),
            ))
        }
    }
}

impl StoreTier for InMemoryTier {
    async fn get(&self, key: &str) -> TierResult<Option<String>> {
        self.simulate_latency().await;
        self.ensure_available()?;
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: &str) -> TierResult<()> {
        self.simulate_latency().await;
        self.ensure_writable(key)?;
        self.insert_raw(key, value);
        self.state.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> TierResult<bool> {
        self.simulate_latency().await;
        self.ensure_writable(key)?;
        // The entry guard holds the shard lock across the check and the write
        let swapped = match self.state.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if expected == Some(occupied.get().as_str()) {
                    occupied.insert(value.to_string());
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(value.to_string());
                    true
                } else {
                    false
                }
            }
        };
        if swapped {
            self.state.writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(swapped)
    }

    async fn keys(&self) -> TierResult<Vec<String>> {
        self.simulate_latency().await;
        self.ensure_available()?;
        Ok(self
            .state
            .entries
            .iter()
            .map(|e| e.key().clone())
            .collect())
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let tier = InMemoryTier::new();
        tier.set("k", "\"v\"").await.unwrap();
        assert_eq!(tier.get("k").await.unwrap(), Some("\"v\"".to_string()));
        assert_eq!(tier.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unavailable_rejects_everything() {
        let tier = InMemoryTier::new();
        tier.insert_raw("k", "1");
        tier.set_available(false);
        assert!(tier.get("k").await.is_err());
        assert!(tier.set("k", "2").await.is_err());
        assert!(tier.keys().await.is_err());
        assert_eq!(tier.peek("k"), Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_injected_write_failure_is_per_key() {
        let tier = InMemoryTier::new();
        tier.fail_writes_for("bad");
        assert!(tier.set("bad", "1").await.is_err());
        assert!(tier.set("good", "1").await.is_ok());

        tier.clear_write_failures();
        assert!(tier.set("bad", "1").await.is_ok());
    }

    #[tokio::test]
    async fn test_compare_and_set_only_replaces_expected_value() {
        let tier = InMemoryTier::new();

        assert!(tier.compare_and_set("k", None, "1").await.unwrap());
        // Key exists now, so an insert-if-absent loses
        assert!(!tier.compare_and_set("k", None, "2").await.unwrap());
        assert!(!tier.compare_and_set("k", Some("0"), "2").await.unwrap());
        assert_eq!(tier.peek("k"), Some("1".to_string()));

        assert!(tier.compare_and_set("k", Some("1"), "2").await.unwrap());
        assert_eq!(tier.peek("k"), Some("2".to_string()));
        assert!(!tier.compare_and_set("absent", Some("2"), "3").await.unwrap());
        assert_eq!(tier.write_count(), 2);
    }

    #[tokio::test]
    async fn test_compare_and_set_honours_injected_failures() {
        let tier = InMemoryTier::new();
        tier.fail_writes_for("bad");
        assert!(tier.compare_and_set("bad", None, "1").await.is_err());

        tier.set_available(false);
        assert!(tier.compare_and_set("good", None, "1").await.is_err());
        assert_eq!(tier.peek("good"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_operations() {
        let tier = InMemoryTier::new();
        tier.set_latency(Duration::from_millis(250));

        let started = tokio::time::Instant::now();
        tier.set("k", "1").await.unwrap();
        tier.get("k").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));

        tier.set_latency(Duration::ZERO);
        let started = tokio::time::Instant::now();
        tier.get("k").await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let tier = InMemoryTier::new();
        let other = tier.clone();
        other.set("shared", "true").await.unwrap();
        assert_eq!(tier.data_keys(), vec!["shared".to_string()]);
        assert_eq!(tier.write_count(), 1);
    }
}
