//! # Price Worker
//!
//! Worker-side half of the pipeline, run inside the `price_worker` process.
//! A worker prices every item of its chunk, then merges the results into the
//! currency's price index through [`DualStore::update_with`], so concurrent
//! workers writing the same index do not drop each other's prices.

use super::chunk_source::Chunk;
use super::messages::WorkerMessage;
use super::price_client::{PriceLookupError, PriceSource};
use crate::config::{CircuitBreakerSettings, PriceApiConfig, PricefeedConfig, StoreConfig};
use crate::resilience::CircuitBreaker;
use crate::store::{DualStore, MarketPrices, MarketPricesKey, PricePoint, StoreError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

const PROGRESS_EVERY: usize = 10;

/// Immutable configuration every worker receives by value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub price_api: PriceApiConfig,
    pub store: StoreConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub update_attempts: u32,
}

impl WorkerSettings {
    pub fn from_config(config: &PricefeedConfig) -> Self {
        Self {
            price_api: config.price_api.clone(),
            store: config.store.clone(),
            circuit_breaker: config.circuit_breaker.clone(),
            update_attempts: config.pipeline.update_attempts,
        }
    }
}

/// Everything a worker process needs, delivered as one JSON document on stdin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerContext {
    pub worker_id: String,
    pub chunk: Chunk,
    pub settings: WorkerSettings,
}

impl WorkerContext {
    pub fn new(worker_id: String, chunk: Chunk, settings: WorkerSettings) -> Self {
        Self {
            worker_id,
            chunk,
            settings,
        }
    }

    pub fn from_json(input: &str) -> Result<Self, WorkerError> {
        serde_json::from_str(input).map_err(|e| WorkerError::Context(e.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid worker context: {0}")]
    Context(String),

    #[error("price client unavailable: {0}")]
    PriceClient(#[from] PriceLookupError),

    #[error("failed to persist prices: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of one chunk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub updated: usize,
    pub failed: usize,
    pub cache_stale: bool,
}

impl WorkerReport {
    pub fn to_message(&self) -> WorkerMessage {
        WorkerMessage::Completed {
            updated: self.updated,
            failed: self.failed,
            cache_stale: self.cache_stale,
        }
    }
}

pub struct PriceWorker<S> {
    prices: S,
    store: DualStore,
    breaker: Option<Arc<CircuitBreaker>>,
    update_attempts: u32,
    request_delay: Duration,
}

impl<S: PriceSource> PriceWorker<S> {
    pub fn new(prices: S, store: DualStore, update_attempts: u32) -> Self {
        Self {
            prices,
            store,
            breaker: None,
            update_attempts,
            request_delay: Duration::ZERO,
        }
    }

    /// Guard price lookups with a circuit breaker
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    /// Price every item of `chunk` and merge the results into the store
    ///
    /// Individual lookup failures are counted, not fatal. Only a failure to
    /// persist the merged prices fails the chunk.
    pub async fn process_chunk<F>(
        &self,
        worker_id: &str,
        chunk: &Chunk,
        mut emit: F,
    ) -> Result<WorkerReport, WorkerError>
    where
        F: FnMut(WorkerMessage),
    {
        let total = chunk.len();
        emit(WorkerMessage::Started {
            worker_id: worker_id.to_string(),
            items: total,
        });

        let mut fresh = MarketPrices::new();
        let mut failed = 0;

        for (index, name) in chunk.names.iter().enumerate() {
            if index > 0 && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }

            match self.price_of(name, &chunk.currency).await {
                Some(point) => {
                    fresh.insert(name.clone(), point);
                }
                None => failed += 1,
            }

            let processed = index + 1;
            if processed % PROGRESS_EVERY == 0 && processed < total {
                emit(WorkerMessage::Progress { processed, total });
            }
        }

        let mut report = WorkerReport {
            updated: fresh.len(),
            failed,
            cache_stale: false,
        };

        if !fresh.is_empty() {
            let key = MarketPricesKey::new(&chunk.currency);
            let outcome = self
                .store
                .update_with(&key, self.update_attempts, |prices| {
                    prices.extend(fresh.iter().map(|(k, v)| (k.clone(), v.clone())));
                })
                .await?;
            report.cache_stale = outcome.is_cache_stale();
            debug!(
                worker_id = worker_id,
                index_size = outcome.value.len(),
                attempts = outcome.attempts,
                "Price index updated"
            );
        }

        info!(
            worker_id = worker_id,
            currency = %chunk.currency,
            updated = report.updated,
            failed = report.failed,
            cache_stale = report.cache_stale,
            "Chunk processed"
        );
        emit(report.to_message());
        Ok(report)
    }

    async fn price_of(&self, name: &str, currency: &str) -> Option<PricePoint> {
        if let Some(cb) = &self.breaker {
            if !cb.should_allow() {
                debug!(name = name, "Price API circuit open, skipping lookup");
                return None;
            }
        }

        let started = Instant::now();
        let result = self.prices.quote(name, currency).await;

        if let Some(cb) = &self.breaker {
            match &result {
                // The API answered; only transport faults and throttling trip the breaker
                Ok(_) | Err(PriceLookupError::NotFound { .. }) => {
                    cb.record_success(started.elapsed())
                }
                Err(_) => cb.record_failure(started.elapsed()),
            }
        }

        match result {
            Ok(quote) => {
                let point = quote.to_price_point(Utc::now());
                if point.is_none() {
                    debug!(name = name, "Quote carried no usable price");
                }
                point
            }
            Err(e) => {
                warn!(name = name, error = %e, "Price lookup failed");
                None
            }
        }
    }
}
