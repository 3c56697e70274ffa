//! # Chunk Sources
//!
//! Bounded batches of market item names waiting for a price refresh. An empty
//! chunk means "no work right now" and is never an error; callers back off.
//!
//! - [`HttpChunkSource`] pulls from the web application's chunk endpoint
//! - [`QueueChunkSource`] serves an in-process queue with lease tracking, so an
//!   item is never handed to two live workers at once

use crate::config::ChunkSourceConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// One batch of work for one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub currency: String,
    pub names: Vec<String>,
}

impl Chunk {
    pub fn new(currency: impl Into<String>, names: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            currency: currency.into(),
            names,
        }
    }

    pub fn empty(currency: impl Into<String>) -> Self {
        Self::new(currency, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}

#[derive(Debug, Error)]
pub enum ChunkSourceError {
    #[error("chunk request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("chunk endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed chunk response: {0}")]
    Decode(String),

    #[error("chunk source misconfigured: {0}")]
    Configuration(String),
}

/// Pull interface for work batches
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Up to `limit` item names priced in `currency`; empty means no work
    async fn next_chunk(&self, limit: usize, currency: &str) -> Result<Chunk, ChunkSourceError>;

    /// Called once the worker that owned `chunk` has exited
    async fn acknowledge(&self, _chunk: &Chunk) {}

    fn source_name(&self) -> &'static str;
}

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    names: Option<Vec<String>>,
}

/// Chunk endpoint of the web application
///
/// `GET <base>/chunk?limit=<n>&currency=<c>&force=<bool>` with a bearer
/// secret, answering `{ "names": [...] }`.
pub struct HttpChunkSource {
    client: Client,
    endpoint: String,
    force: bool,
}

impl std::fmt::Debug for HttpChunkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChunkSource")
            .field("endpoint", &self.endpoint)
            .field("force", &self.force)
            .finish()
    }
}

impl HttpChunkSource {
    pub fn new(config: &ChunkSourceConfig) -> Result<Self, ChunkSourceError> {
        let base = config.base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(ChunkSourceError::Configuration(
                "chunk_source.base_url is empty".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        if let Some(secret) = config.secret.as_deref().filter(|s| !s.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {secret}")).map_err(|e| {
                ChunkSourceError::Configuration(format!("invalid chunk source secret: {e}"))
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(format!("pricefeed/{}", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| {
                ChunkSourceError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;

        let endpoint = format!("{base}/chunk");
        info!(endpoint = %endpoint, force = config.force, "HTTP chunk source ready");

        Ok(Self {
            client,
            endpoint,
            force: config.force,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChunkSource for HttpChunkSource {
    async fn next_chunk(&self, limit: usize, currency: &str) -> Result<Chunk, ChunkSourceError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("limit", limit.to_string()),
                ("currency", currency.to_string()),
                ("force", self.force.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChunkSourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let parsed: ChunkResponse =
            serde_json::from_str(&body).map_err(|e| ChunkSourceError::Decode(e.to_string()))?;

        let mut names = parsed.names.unwrap_or_default();
        names.truncate(limit);
        debug!(count = names.len(), currency = currency, "Fetched chunk");
        Ok(Chunk::new(currency, names))
    }

    fn source_name(&self) -> &'static str {
        "http"
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<String>,
    leased: HashSet<String>,
    leases: HashMap<Uuid, Vec<String>>,
}

/// In-process queue of item names
///
/// Items handed out stay leased until the chunk is acknowledged, and a leased
/// item is neither handed out again nor re-enqueued.
#[derive(Debug, Default)]
pub struct QueueChunkSource {
    state: Mutex<QueueState>,
}

impl QueueChunkSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let source = Self::new();
        source.enqueue(items);
        source
    }

    /// Add items; duplicates of pending or leased items are skipped.
    /// Returns how many were accepted.
    pub fn enqueue<I, S>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock();
        let mut accepted = 0;
        for item in items {
            let item = item.into();
            if state.leased.contains(&item) || state.pending.contains(&item) {
                continue;
            }
            state.pending.push_back(item);
            accepted += 1;
        }
        accepted
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn leased(&self) -> usize {
        self.state.lock().leased.len()
    }
}

#[async_trait]
impl ChunkSource for QueueChunkSource {
    async fn next_chunk(&self, limit: usize, currency: &str) -> Result<Chunk, ChunkSourceError> {
        let mut state = self.state.lock();
        let take = limit.min(state.pending.len());
        let names: Vec<String> = state.pending.drain(..take).collect();
        if names.is_empty() {
            return Ok(Chunk::empty(currency));
        }

        let chunk = Chunk::new(currency, names);
        state.leased.extend(chunk.names.iter().cloned());
        state.leases.insert(chunk.id, chunk.names.clone());
        Ok(chunk)
    }

    async fn acknowledge(&self, chunk: &Chunk) {
        let mut state = self.state.lock();
        if let Some(names) = state.leases.remove(&chunk.id) {
            for name in &names {
                state.leased.remove(name);
            }
        }
    }

    fn source_name(&self) -> &'static str {
        "queue"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_respects_limit_and_drains() {
        let source = QueueChunkSource::with_items(["a", "b", "c"]);
        let first = source.next_chunk(2, "USD").await.unwrap();
        assert_eq!(first.names, vec!["a", "b"]);
        let second = source.next_chunk(2, "USD").await.unwrap();
        assert_eq!(second.names, vec!["c"]);
        assert!(source.next_chunk(2, "USD").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_leased_items_are_not_reassigned() {
        let source = QueueChunkSource::with_items(["a", "b"]);
        let chunk = source.next_chunk(5, "USD").await.unwrap();
        assert_eq!(source.leased(), 2);

        // Re-surfacing a leased item while its worker is live is ignored
        assert_eq!(source.enqueue(["a"]), 0);
        assert!(source.next_chunk(5, "USD").await.unwrap().is_empty());

        source.acknowledge(&chunk).await;
        assert_eq!(source.leased(), 0);
        assert_eq!(source.enqueue(["a"]), 1);
        assert_eq!(source.next_chunk(5, "USD").await.unwrap().names, vec!["a"]);
    }

    #[test]
    fn test_missing_names_field_is_empty() {
        let parsed: ChunkResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.names.unwrap_or_default().is_empty());
        let parsed: ChunkResponse = serde_json::from_str("{\"names\": null}").unwrap();
        assert!(parsed.names.is_none());
    }

    #[test]
    fn test_http_source_builds_chunk_endpoint() {
        let config = ChunkSourceConfig {
            base_url: "http://localhost:3000/api/prices/".to_string(),
            secret: Some("s3cret".to_string()),
            ..ChunkSourceConfig::default()
        };
        let source = HttpChunkSource::new(&config).unwrap();
        assert_eq!(source.endpoint(), "http://localhost:3000/api/prices/chunk");
    }

    #[test]
    fn test_http_source_rejects_empty_base() {
        let config = ChunkSourceConfig {
            base_url: "  ".to_string(),
            ..ChunkSourceConfig::default()
        };
        assert!(matches!(
            HttpChunkSource::new(&config),
            Err(ChunkSourceError::Configuration(_))
        ));
    }
}
