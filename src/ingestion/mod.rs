//! # Ingestion Pipeline
//!
//! Continuously pulls chunks of market item names and prices them in
//! isolated worker processes that write through the [`DualStore`].
//!
//! ```text
//! WorkerPool ──> ChunkSource (pull chunk)
//!     │
//!     └──> WorkerLauncher ──> price_worker process ──> PriceSource
//!                                      │
//!                                      └──> DualStore::update_with
//! ```
//!
//! [`DualStore`]: crate::store::DualStore

pub mod chunk_source;
pub mod launcher;
pub mod messages;
pub mod price_client;
pub mod worker;
pub mod worker_pool;

pub use chunk_source::{Chunk, ChunkSource, ChunkSourceError, HttpChunkSource, QueueChunkSource};
pub use launcher::{
    ProcessLauncher, WorkerExitError, WorkerHandle, WorkerLauncher, WorkerReporter, WorkerSpec,
    WorkerState,
};
pub use messages::WorkerMessage;
pub use price_client::{PriceClient, PriceLookupError, PriceQuote, PriceSource};
pub use worker::{PriceWorker, WorkerContext, WorkerError, WorkerReport, WorkerSettings};
pub use worker_pool::{
    LaneState, LaneStats, PoolHandle, PoolStats, WorkerPool, WorkerPoolConfig, WorkerPoolError,
};
