//! # Worker Pool
//!
//! A fixed number of lanes, each running one worker at a time, forever.
//!
//! Every lane is an explicit supervisor with two stages joined by bounded
//! channels of capacity one:
//!
//! ```text
//!   supervisor --demand--> fetch stage --chunk--> supervisor --> launcher
//!        ^                    |   ^                                  |
//!        |                    v   | empty chunk or fetch error       |
//!        |                  Backoff                                  |
//!        +-------------------------- worker exited -----------------+
//! ```
//!
//! The fetch stage only fetches when the supervisor asks, so a lane never
//! holds a chunk it cannot start, and generation N+1 of a lane never starts
//! before generation N has exited. Worker failures of any kind end in
//! `Exited` and the lane moves on; the failed chunk is not re-queued.
//!
//! Shutdown stops lanes from asking for new chunks and waits for live
//! workers to exit on their own. Workers are never killed mid-write.

use super::chunk_source::{Chunk, ChunkSource};
use super::launcher::{WorkerLauncher, WorkerSpec};
use super::messages::WorkerMessage;
use crate::config::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Where a lane is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneState {
    Idle = 0,
    Fetching = 1,
    Backoff = 2,
    Spawned = 3,
    Running = 4,
    Exited = 5,
    Stopped = 6,
}

impl From<u8> for LaneState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Fetching,
            2 => Self::Backoff,
            3 => Self::Spawned,
            4 => Self::Running,
            5 => Self::Exited,
            _ => Self::Stopped,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerPoolError {
    #[error("invalid worker pool configuration: {0}")]
    InvalidConfig(String),
}

/// Pool sizing and pacing
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub items_per_worker: usize,
    pub currency: String,
    /// Pause after an empty chunk, a fetch error or a failed spawn
    pub empty_backoff: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::from_pipeline(&PipelineConfig::default())
    }
}

impl WorkerPoolConfig {
    pub fn from_pipeline(pipeline: &PipelineConfig) -> Self {
        Self {
            worker_count: pipeline.worker_count,
            items_per_worker: pipeline.items_per_worker,
            currency: pipeline.currency.trim().to_ascii_uppercase(),
            empty_backoff: pipeline.empty_backoff(),
        }
    }
}

/// Lock-free per-lane counters, readable while the lane runs
#[derive(Debug, Default)]
struct LaneMetrics {
    state: AtomicU8,
    generations: AtomicU64,
    chunks_completed: AtomicU64,
    worker_failures: AtomicU64,
    backoffs: AtomicU64,
    fetch_errors: AtomicU64,
    items_dispatched: AtomicU64,
}

impl LaneMetrics {
    fn set_state(&self, state: LaneState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, lane: usize) -> LaneStats {
        LaneStats {
            lane,
            state: LaneState::from(self.state.load(Ordering::Acquire)),
            generations: self.generations.load(Ordering::Relaxed),
            chunks_completed: self.chunks_completed.load(Ordering::Relaxed),
            worker_failures: self.worker_failures.load(Ordering::Relaxed),
            backoffs: self.backoffs.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            items_dispatched: self.items_dispatched.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneStats {
    pub lane: usize,
    pub state: LaneState,
    /// Workers launched, including ones that failed to spawn
    pub generations: u64,
    pub chunks_completed: u64,
    pub worker_failures: u64,
    pub backoffs: u64,
    pub fetch_errors: u64,
    pub items_dispatched: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub lanes: Vec<LaneStats>,
}

impl PoolStats {
    pub fn chunks_completed(&self) -> u64 {
        self.lanes.iter().map(|l| l.chunks_completed).sum()
    }

    pub fn worker_failures(&self) -> u64 {
        self.lanes.iter().map(|l| l.worker_failures).sum()
    }

    pub fn generations(&self) -> u64 {
        self.lanes.iter().map(|l| l.generations).sum()
    }

    pub fn lanes_in(&self, state: LaneState) -> usize {
        self.lanes.iter().filter(|l| l.state == state).count()
    }
}

/// Shared by both stages of every lane; read-only once the pool starts
#[derive(Clone)]
struct LaneContext {
    lane: usize,
    config: Arc<WorkerPoolConfig>,
    source: Arc<dyn ChunkSource>,
    launcher: Arc<dyn WorkerLauncher>,
    metrics: Arc<LaneMetrics>,
}

/// Self-replenishing pool of worker lanes
pub struct WorkerPool {
    config: Arc<WorkerPoolConfig>,
    source: Arc<dyn ChunkSource>,
    launcher: Arc<dyn WorkerLauncher>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("source", &self.source.source_name())
            .field("launcher", &self.launcher.launcher_name())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        source: Arc<dyn ChunkSource>,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Result<Self, WorkerPoolError> {
        if config.worker_count == 0 {
            return Err(WorkerPoolError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if config.items_per_worker == 0 {
            return Err(WorkerPoolError::InvalidConfig(
                "items_per_worker must be at least 1".to_string(),
            ));
        }
        if config.currency.is_empty() {
            return Err(WorkerPoolError::InvalidConfig(
                "currency must not be empty".to_string(),
            ));
        }

        Ok(Self {
            config: Arc::new(config),
            source,
            launcher,
        })
    }

    /// Start every lane; the pool runs until the handle shuts it down or is dropped
    pub fn start(self) -> PoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut metrics = Vec::with_capacity(self.config.worker_count);
        let mut lanes = Vec::with_capacity(self.config.worker_count);

        for lane in 0..self.config.worker_count {
            let lane_metrics = Arc::new(LaneMetrics::default());
            let ctx = LaneContext {
                lane,
                config: self.config.clone(),
                source: self.source.clone(),
                launcher: self.launcher.clone(),
                metrics: lane_metrics.clone(),
            };
            lanes.push(tokio::spawn(run_lane(ctx, shutdown_rx.clone())));
            metrics.push(lane_metrics);
        }

        info!(
            worker_count = self.config.worker_count,
            items_per_worker = self.config.items_per_worker,
            currency = %self.config.currency,
            source = self.source.source_name(),
            launcher = self.launcher.launcher_name(),
            "Worker pool started"
        );

        PoolHandle {
            shutdown: shutdown_tx,
            lanes,
            metrics,
        }
    }

    /// Run until `signal` resolves, then shut down gracefully
    pub async fn run_until<F>(self, signal: F) -> PoolStats
    where
        F: Future<Output = ()>,
    {
        let handle = self.start();
        signal.await;
        handle.shutdown().await
    }

    /// Run until the process is killed
    pub async fn run_forever(self) -> PoolStats {
        self.run_until(std::future::pending()).await
    }
}

/// Control handle of a running pool
#[derive(Debug)]
pub struct PoolHandle {
    shutdown: watch::Sender<bool>,
    lanes: Vec<JoinHandle<()>>,
    metrics: Vec<Arc<LaneMetrics>>,
}

impl PoolHandle {
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            lanes: self
                .metrics
                .iter()
                .enumerate()
                .map(|(lane, m)| m.snapshot(lane))
                .collect(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.lanes.iter().any(|lane| !lane.is_finished())
    }

    /// Stop fetching, wait for in-flight workers to exit, return final stats
    pub async fn shutdown(self) -> PoolStats {
        info!("Worker pool shutting down; waiting for in-flight workers");
        let _ = self.shutdown.send(true);

        for (lane, join) in self.lanes.into_iter().enumerate() {
            if let Err(e) = join.await {
                error!(lane = lane, error = %e, "Lane task ended abnormally");
            }
        }

        let stats = PoolStats {
            lanes: self
                .metrics
                .iter()
                .enumerate()
                .map(|(lane, m)| m.snapshot(lane))
                .collect(),
        };
        info!(
            chunks_completed = stats.chunks_completed(),
            worker_failures = stats.worker_failures(),
            "Worker pool stopped"
        );
        stats
    }
}

/// Resolves once shutdown is requested or the handle is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn is_shutting_down(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

async fn run_lane(ctx: LaneContext, mut shutdown: watch::Receiver<bool>) {
    let (demand_tx, demand_rx) = mpsc::channel::<()>(1);
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Chunk>(1);
    let fetcher = tokio::spawn(fetch_stage(ctx.clone(), demand_rx, chunk_tx, shutdown.clone()));

    debug!(lane = ctx.lane, "Lane started");
    let mut generation: u64 = 0;

    loop {
        ctx.metrics.set_state(LaneState::Idle);
        if is_shutting_down(&shutdown) || demand_tx.send(()).await.is_err() {
            break;
        }

        let chunk = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            chunk = chunk_rx.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };

        generation += 1;
        run_generation(&ctx, generation, chunk, &mut shutdown).await;
    }

    drop(demand_tx);
    if let Err(e) = fetcher.await {
        error!(lane = ctx.lane, error = %e, "Fetch stage ended abnormally");
    }

    // A chunk fetched just before shutdown was never started; release it
    while let Ok(chunk) = chunk_rx.try_recv() {
        ctx.source.acknowledge(&chunk).await;
    }

    ctx.metrics.set_state(LaneState::Stopped);
    debug!(lane = ctx.lane, generations = generation, "Lane stopped");
}

async fn run_generation(
    ctx: &LaneContext,
    generation: u64,
    chunk: Chunk,
    shutdown: &mut watch::Receiver<bool>,
) {
    let lane = ctx.lane;
    let items = chunk.len();
    LaneMetrics::bump(&ctx.metrics.generations);
    ctx.metrics
        .items_dispatched
        .fetch_add(items as u64, Ordering::Relaxed);

    let spec = WorkerSpec::new(lane, generation, chunk.clone());
    let mut handle = match ctx.launcher.launch(spec).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(lane = lane, generation = generation, error = %e, "Worker failed to start");
            LaneMetrics::bump(&ctx.metrics.worker_failures);
            ctx.metrics.set_state(LaneState::Exited);
            ctx.source.acknowledge(&chunk).await;
            // Keep a broken launcher from draining the source in a tight loop
            backoff(ctx, shutdown).await;
            return;
        }
    };

    ctx.metrics.set_state(LaneState::Spawned);
    debug!(
        lane = lane,
        worker_id = handle.worker_id(),
        items = items,
        "Worker spawned"
    );

    ctx.metrics.set_state(LaneState::Running);
    let worker_id = handle.worker_id().to_string();
    let result = handle
        .wait(|message| log_worker_message(lane, &worker_id, message))
        .await;
    ctx.metrics.set_state(LaneState::Exited);

    match result {
        Ok(()) => {
            LaneMetrics::bump(&ctx.metrics.chunks_completed);
            debug!(lane = lane, worker_id = %worker_id, "Worker exited cleanly");
        }
        Err(e) => {
            LaneMetrics::bump(&ctx.metrics.worker_failures);
            warn!(lane = lane, worker_id = %worker_id, error = %e, "Worker exited abnormally");
        }
    }

    ctx.source.acknowledge(handle.chunk()).await;
}

async fn fetch_stage(
    ctx: LaneContext,
    mut demand: mpsc::Receiver<()>,
    chunks: mpsc::Sender<Chunk>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => return,
            wanted = demand.recv() => {
                if wanted.is_none() {
                    return;
                }
            }
        }

        loop {
            ctx.metrics.set_state(LaneState::Fetching);
            let fetched = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => return,
                fetched = ctx.source.next_chunk(ctx.config.items_per_worker, &ctx.config.currency) => fetched,
            };

            match fetched {
                Ok(chunk) if !chunk.is_empty() => {
                    debug!(lane = ctx.lane, items = chunk.len(), "Chunk fetched");
                    if chunks.send(chunk).await.is_err() {
                        return;
                    }
                    break;
                }
                Ok(_) => {
                    debug!(lane = ctx.lane, "No work available, backing off");
                }
                Err(e) => {
                    LaneMetrics::bump(&ctx.metrics.fetch_errors);
                    warn!(lane = ctx.lane, error = %e, "Chunk fetch failed, backing off");
                }
            }

            if !backoff(&ctx, &mut shutdown).await {
                return;
            }
        }
    }
}

/// Sleep for the configured backoff; false if shutdown interrupted it
async fn backoff(ctx: &LaneContext, shutdown: &mut watch::Receiver<bool>) -> bool {
    ctx.metrics.set_state(LaneState::Backoff);
    LaneMetrics::bump(&ctx.metrics.backoffs);
    tokio::select! {
        biased;
        _ = shutdown_requested(shutdown) => false,
        _ = tokio::time::sleep(ctx.config.empty_backoff) => true,
    }
}

fn log_worker_message(lane: usize, worker_id: &str, message: &WorkerMessage) {
    match message {
        WorkerMessage::Started { items, .. } => {
            debug!(lane = lane, worker_id = worker_id, items = items, "Worker started");
        }
        WorkerMessage::Progress { processed, total } => {
            debug!(
                lane = lane,
                worker_id = worker_id,
                processed = processed,
                total = total,
                "Worker progress"
            );
        }
        WorkerMessage::Completed {
            updated,
            failed,
            cache_stale,
        } => {
            info!(
                lane = lane,
                worker_id = worker_id,
                updated = updated,
                failed = failed,
                cache_stale = cache_stale,
                "Worker completed chunk"
            );
        }
        WorkerMessage::Failed { reason } => {
            warn!(lane = lane, worker_id = worker_id, reason = %reason, "Worker reported failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::chunk_source::QueueChunkSource;
    use crate::ingestion::launcher::{WorkerExitError, WorkerHandle};
    use async_trait::async_trait;

    struct InstantLauncher;

    #[async_trait]
    impl WorkerLauncher for InstantLauncher {
        async fn launch(&self, spec: WorkerSpec) -> Result<WorkerHandle, WorkerExitError> {
            let (handle, reporter) = WorkerHandle::channel(spec);
            reporter.exit(Ok(()));
            Ok(handle)
        }

        fn launcher_name(&self) -> &'static str {
            "instant"
        }
    }

    fn config(worker_count: usize) -> WorkerPoolConfig {
        WorkerPoolConfig {
            worker_count,
            items_per_worker: 2,
            currency: "USD".to_string(),
            empty_backoff: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = WorkerPool::new(
            config(0),
            Arc::new(QueueChunkSource::new()),
            Arc::new(InstantLauncher),
        );
        assert!(matches!(result, Err(WorkerPoolError::InvalidConfig(_))));
    }

    #[test]
    fn test_lane_state_round_trips_through_u8() {
        for state in [
            LaneState::Idle,
            LaneState::Fetching,
            LaneState::Backoff,
            LaneState::Spawned,
            LaneState::Running,
            LaneState::Exited,
            LaneState::Stopped,
        ] {
            assert_eq!(LaneState::from(state as u8), state);
        }
    }

    #[tokio::test]
    async fn test_single_lane_drains_queue_in_order() {
        let source = Arc::new(QueueChunkSource::with_items(["a", "b", "c", "d", "e"]));
        let pool = WorkerPool::new(config(1), source.clone(), Arc::new(InstantLauncher)).unwrap();
        let handle = pool.start();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let stats = handle.shutdown().await;

        assert_eq!(stats.chunks_completed(), 3);
        assert_eq!(stats.lanes[0].items_dispatched, 5);
        assert_eq!(stats.lanes[0].state, LaneState::Stopped);
        assert_eq!(source.pending(), 0);
        assert_eq!(source.leased(), 0);
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_lanes() {
        let pool = WorkerPool::new(
            config(2),
            Arc::new(QueueChunkSource::new()),
            Arc::new(InstantLauncher),
        )
        .unwrap();
        let handle = pool.start();
        let metrics = handle.metrics.clone();
        drop(handle);

        tokio::time::sleep(Duration::from_millis(100)).await;
        for m in metrics {
            assert_eq!(m.snapshot(0).state, LaneState::Stopped);
        }
    }
}
