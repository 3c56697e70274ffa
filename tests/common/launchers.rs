use async_trait::async_trait;
use parking_lot::Mutex;
use pricefeed_core::ingestion::{
    WorkerExitError, WorkerHandle, WorkerLauncher, WorkerMessage, WorkerSpec,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a mock worker ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    Succeed,
    ExitWith(i32),
    Crash,
}

/// Launches in-process "workers" that hold their chunk for a while
#[derive(Debug)]
pub struct MockLauncher {
    hold: Duration,
    outcome: MockOutcome,
    refuse_spawn: bool,
    launched: Arc<Mutex<Vec<WorkerSpec>>>,
    live: Arc<Mutex<HashSet<usize>>>,
    overlaps: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl MockLauncher {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            outcome: MockOutcome::Succeed,
            refuse_spawn: false,
            launched: Arc::default(),
            live: Arc::default(),
            overlaps: Arc::default(),
            finished: Arc::default(),
        }
    }

    pub fn with_outcome(mut self, outcome: MockOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Every launch fails before a worker exists
    pub fn refusing() -> Self {
        Self {
            refuse_spawn: true,
            ..Self::new(Duration::ZERO)
        }
    }

    pub fn launched(&self) -> Vec<WorkerSpec> {
        self.launched.lock().clone()
    }

    /// Times a lane launched a worker while its previous one was still alive
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Workers that reached their exit
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerLauncher for MockLauncher {
    async fn launch(&self, spec: WorkerSpec) -> Result<WorkerHandle, WorkerExitError> {
        if self.refuse_spawn {
            return Err(WorkerExitError::SpawnFailed("mock launcher refuses".to_string()));
        }

        self.launched.lock().push(spec.clone());
        if !self.live.lock().insert(spec.lane) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        let lane = spec.lane;
        let items = spec.chunk.len();
        let worker_id = spec.worker_id.clone();
        let (handle, reporter) = WorkerHandle::channel(spec);

        let hold = self.hold;
        let outcome = self.outcome;
        let live = self.live.clone();
        let finished = self.finished.clone();
        tokio::spawn(async move {
            reporter
                .send(WorkerMessage::Started {
                    worker_id,
                    items,
                })
                .await;
            tokio::time::sleep(hold).await;
            live.lock().remove(&lane);
            finished.fetch_add(1, Ordering::SeqCst);

            match outcome {
                MockOutcome::Succeed => {
                    reporter
                        .send(WorkerMessage::Completed {
                            updated: items,
                            failed: 0,
                            cache_stale: false,
                        })
                        .await;
                    reporter.exit(Ok(()));
                }
                MockOutcome::ExitWith(code) => {
                    reporter.exit(Err(WorkerExitError::NonZeroExit { code }));
                }
                // Dropping the reporter without an exit reads as a crash
                MockOutcome::Crash => drop(reporter),
            }
        });

        Ok(handle)
    }

    fn launcher_name(&self) -> &'static str {
        "mock"
    }
}
