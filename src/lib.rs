#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, Redis in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Pricefeed Core
//!
//! Market price ingestion backed by a two-tier store.
//!
//! ## Overview
//!
//! Prices live in a fast, non-authoritative cache tier (Redis) in front of an
//! authoritative durable tier (PostgreSQL). Reads prefer the cache and fall
//! back to the durable tier; writes always land durably first and report
//! when the cache could not follow. After a cache outage the reconciler
//! copies the durable tier back into the cache.
//!
//! Ingestion runs as a fixed set of lanes. Each lane pulls a chunk of item
//! names from a remote work endpoint, hands it to an isolated worker process,
//! and waits for that worker to exit before pulling the next chunk.
//!
//! ## Module Organization
//!
//! - [`config`] - Layered TOML/env configuration
//! - [`store`] - Tier health, the dual store, and reconciliation
//! - [`ingestion`] - Chunk sources, worker launch, and the worker pool
//! - [`resilience`] - Circuit breaker guarding the cache tier
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pricefeed_core::config::ConfigManager;
//! use pricefeed_core::store::DualStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//! let store = DualStore::connect(&config.store, &config.circuit_breaker);
//!
//! let health = store.check_health().await;
//! println!("cache up: {}, durable up: {}", health.cache_available, health.durable_available);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ingestion;
pub mod logging;
pub mod resilience;
pub mod store;

pub use config::{ConfigManager, PricefeedConfig};
pub use error::{PricefeedError, PricefeedResult};
pub use ingestion::{
    Chunk, ChunkSource, HttpChunkSource, PoolHandle, PoolStats, ProcessLauncher, WorkerLauncher,
    WorkerPool, WorkerPoolConfig,
};
pub use store::{DualStore, HealthSnapshot, Reconciler, StoreHealth, SyncResult, TierClients};
