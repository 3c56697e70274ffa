//! Lane supervision, backoff, failure handling and graceful shutdown

mod common;

use common::launchers::{MockLauncher, MockOutcome};
use common::sources::ScriptedChunkSource;
use pricefeed_core::ingestion::{
    LaneState, QueueChunkSource, WorkerPool, WorkerPoolConfig,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn pool_config(worker_count: usize, backoff_ms: u64) -> WorkerPoolConfig {
    WorkerPoolConfig {
        worker_count,
        items_per_worker: 10,
        currency: "USD".to_string(),
        empty_backoff: Duration::from_millis(backoff_ms),
    }
}

#[tokio::test]
async fn test_two_chunks_three_lanes_then_everyone_backs_off() {
    let source = Arc::new(ScriptedChunkSource::with_chunks(vec![
        vec!["a", "b"],
        vec!["c"],
    ]));
    let launcher = Arc::new(MockLauncher::new(Duration::from_millis(50)));
    let pool = WorkerPool::new(pool_config(3, 30), source.clone(), launcher.clone()).unwrap();

    let handle = pool.start();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let stats = handle.stats();
    assert!(handle.is_running(), "pool must keep running with no work");
    assert_eq!(stats.chunks_completed(), 2);
    assert_eq!(stats.worker_failures(), 0);

    let lanes: HashSet<usize> = launcher.launched().iter().map(|s| s.lane).collect();
    assert_eq!(lanes.len(), 2, "each chunk went to a different lane");

    for lane in &stats.lanes {
        assert!(lane.backoffs >= 1, "lane {} never backed off", lane.lane);
    }
    assert!(source.fetches() > 3);

    let final_stats = handle.shutdown().await;
    assert_eq!(final_stats.chunks_completed(), 2);
    assert_eq!(final_stats.lanes_in(LaneState::Stopped), 3);
}

#[tokio::test]
async fn test_lane_never_overlaps_generations() {
    let source = Arc::new(QueueChunkSource::with_items(
        (0..40).map(|i| format!("item-{i}")),
    ));
    let launcher = Arc::new(MockLauncher::new(Duration::from_millis(10)));
    let config = WorkerPoolConfig {
        items_per_worker: 3,
        ..pool_config(2, 20)
    };
    let pool = WorkerPool::new(config, source.clone(), launcher.clone()).unwrap();

    let handle = pool.start();
    tokio::time::sleep(Duration::from_millis(400)).await;
    let stats = handle.shutdown().await;

    assert_eq!(launcher.overlaps(), 0);
    assert_eq!(stats.chunks_completed(), 14);
    assert_eq!(source.pending(), 0);
    assert_eq!(source.leased(), 0);

    // Each lane numbers its generations 1, 2, 3, ...
    for lane in 0..2 {
        let generations: Vec<u64> = launcher
            .launched()
            .iter()
            .filter(|s| s.lane == lane)
            .map(|s| s.generation)
            .collect();
        let expected: Vec<u64> = (1..=generations.len() as u64).collect();
        assert_eq!(generations, expected);
    }
}

#[tokio::test]
async fn test_failed_workers_do_not_stop_the_lane() {
    for outcome in [MockOutcome::ExitWith(2), MockOutcome::Crash] {
        let source = Arc::new(ScriptedChunkSource::with_chunks(vec![
            vec!["a"],
            vec!["b"],
            vec!["c"],
        ]));
        let launcher = Arc::new(MockLauncher::new(Duration::from_millis(5)).with_outcome(outcome));
        let pool = WorkerPool::new(pool_config(1, 20), source.clone(), launcher).unwrap();

        let handle = pool.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let stats = handle.shutdown().await;

        assert_eq!(stats.worker_failures(), 3, "{outcome:?}");
        assert_eq!(stats.chunks_completed(), 0);
        assert_eq!(source.acknowledged().len(), 3);
    }
}

#[tokio::test]
async fn test_fetch_errors_back_off_and_retry() {
    let source = Arc::new(ScriptedChunkSource::default());
    source.push_error("upstream exploded");
    let launcher = Arc::new(MockLauncher::new(Duration::from_millis(5)));
    let pool = WorkerPool::new(pool_config(1, 20), source.clone(), launcher).unwrap();

    let handle = pool.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = handle.shutdown().await;

    assert_eq!(stats.lanes[0].fetch_errors, 1);
    // The failed fetch and the empty ones after it all back off
    assert!(stats.lanes[0].backoffs >= 2);
    assert!(source.fetches() >= 2);
    assert_eq!(stats.generations(), 0);
}

#[tokio::test]
async fn test_spawn_failures_back_off() {
    let source = Arc::new(QueueChunkSource::with_items(["a", "b", "c", "d"]));
    let launcher = Arc::new(MockLauncher::refusing());
    let config = WorkerPoolConfig {
        items_per_worker: 1,
        ..pool_config(1, 100)
    };
    let pool = WorkerPool::new(config, source.clone(), launcher).unwrap();

    let handle = pool.start();
    tokio::time::sleep(Duration::from_millis(150)).await;
    let stats = handle.shutdown().await;

    // One backoff per failed spawn keeps the lane from draining the queue
    assert!(stats.generations() <= 2, "{stats:?}");
    assert_eq!(stats.worker_failures(), stats.generations());
    assert_eq!(source.leased(), 0);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_workers() {
    let source = Arc::new(ScriptedChunkSource::with_chunks(vec![
        vec!["a"],
        vec!["b"],
    ]));
    let launcher = Arc::new(MockLauncher::new(Duration::from_millis(200)));
    let pool = WorkerPool::new(pool_config(2, 20), source, launcher.clone()).unwrap();

    let handle = pool.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(launcher.finished(), 0);

    let stats = handle.shutdown().await;
    assert_eq!(launcher.finished(), 2);
    assert_eq!(stats.chunks_completed(), 2);
    assert_eq!(stats.lanes_in(LaneState::Stopped), 2);
}

#[tokio::test]
async fn test_run_until_returns_after_signal() {
    let source = Arc::new(ScriptedChunkSource::with_chunks(vec![vec!["a"]]));
    let launcher = Arc::new(MockLauncher::new(Duration::from_millis(5)));
    let pool = WorkerPool::new(pool_config(1, 10), source, launcher).unwrap();

    let stats = pool
        .run_until(tokio::time::sleep(Duration::from_millis(100)))
        .await;
    assert_eq!(stats.chunks_completed(), 1);
}
