//! # Worker Launching
//!
//! A [`WorkerLauncher`] turns a chunk into a running worker and hands back a
//! [`WorkerHandle`], the only way the pool ever addresses a worker. The handle
//! carries the worker's message stream and its exit result.
//!
//! [`ProcessLauncher`] runs every worker as a separate OS process so a crash
//! or leak inside one worker cannot corrupt the pool. The worker context goes
//! in as one JSON document on stdin; progress comes back as JSON lines on
//! stdout; stderr is inherited so worker logs land next to the pool's.

use super::chunk_source::Chunk;
use super::messages::WorkerMessage;
use super::worker::{WorkerContext, WorkerSettings};
use crate::config::PricefeedConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const MESSAGE_BUFFER: usize = 64;

/// Lifecycle of one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Spawned,
    Running,
    Exited,
}

/// Abnormal worker termination; logged by the pool, never propagated
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerExitError {
    #[error("failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("worker crashed: {0}")]
    Crashed(String),

    #[error("worker exited with status {code}")]
    NonZeroExit { code: i32 },

    #[error("worker killed after {after_secs}s timeout")]
    TimedOut { after_secs: u64 },

    #[error("worker I/O error: {0}")]
    Io(String),
}

/// What to launch
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSpec {
    pub worker_id: String,
    pub lane: usize,
    pub generation: u64,
    pub chunk: Chunk,
}

impl WorkerSpec {
    pub fn new(lane: usize, generation: u64, chunk: Chunk) -> Self {
        Self {
            worker_id: format!("lane{lane}-gen{generation}"),
            lane,
            generation,
            chunk,
        }
    }
}

/// Pool-side view of one live worker
#[derive(Debug)]
pub struct WorkerHandle {
    spec: WorkerSpec,
    state: WorkerState,
    messages: mpsc::Receiver<WorkerMessage>,
    exit: oneshot::Receiver<Result<(), WorkerExitError>>,
}

/// Launcher-side ends of a handle's channels
#[derive(Debug)]
pub struct WorkerReporter {
    messages: mpsc::Sender<WorkerMessage>,
    exit: oneshot::Sender<Result<(), WorkerExitError>>,
}

impl WorkerReporter {
    /// Forward a message; dropped silently if the pool stopped listening
    pub async fn send(&self, message: WorkerMessage) {
        let _ = self.messages.send(message).await;
    }

    pub fn message_sender(&self) -> mpsc::Sender<WorkerMessage> {
        self.messages.clone()
    }

    /// Report termination, consuming the reporter
    pub fn exit(self, result: Result<(), WorkerExitError>) {
        let _ = self.exit.send(result);
    }
}

impl WorkerHandle {
    /// A handle in `Spawned` state plus the ends a launcher reports through
    pub fn channel(spec: WorkerSpec) -> (Self, WorkerReporter) {
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_BUFFER);
        let (exit_tx, exit_rx) = oneshot::channel();
        (
            Self {
                spec,
                state: WorkerState::Spawned,
                messages: message_rx,
                exit: exit_rx,
            },
            WorkerReporter {
                messages: message_tx,
                exit: exit_tx,
            },
        )
    }

    pub fn worker_id(&self) -> &str {
        &self.spec.worker_id
    }

    pub fn lane(&self) -> usize {
        self.spec.lane
    }

    pub fn generation(&self) -> u64 {
        self.spec.generation
    }

    pub fn chunk(&self) -> &Chunk {
        &self.spec.chunk
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Observe messages until the worker exits
    ///
    /// Messages already queued when the exit arrives are still delivered. A
    /// launcher that vanishes without reporting counts as a crash.
    pub async fn wait<F>(&mut self, mut on_message: F) -> Result<(), WorkerExitError>
    where
        F: FnMut(&WorkerMessage),
    {
        self.state = WorkerState::Running;

        let result = loop {
            tokio::select! {
                biased;
                Some(message) = self.messages.recv() => on_message(&message),
                exit = &mut self.exit => {
                    break exit.unwrap_or_else(|_| {
                        Err(WorkerExitError::Crashed(
                            "launcher dropped the worker without reporting an exit".to_string(),
                        ))
                    });
                }
            }
        };

        while let Ok(message) = self.messages.try_recv() {
            on_message(&message);
        }

        self.state = WorkerState::Exited;
        result
    }
}

/// Creates workers for the pool
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, spec: WorkerSpec) -> Result<WorkerHandle, WorkerExitError>;

    fn launcher_name(&self) -> &'static str;
}

/// Launches the `price_worker` executable
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    settings: WorkerSettings,
    timeout: Option<Duration>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, settings: WorkerSettings) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            settings,
            timeout: None,
        }
    }

    /// Launcher for the configured program, defaulting to the `price_worker`
    /// binary installed next to the current executable
    pub fn from_config(config: &PricefeedConfig) -> std::io::Result<Self> {
        let program = match &config.pipeline.worker_program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?.with_file_name(format!(
                "price_worker{}",
                std::env::consts::EXE_SUFFIX
            )),
        };

        Ok(Self::new(program, WorkerSettings::from_config(config))
            .with_timeout(config.pipeline.worker_timeout()))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, spec: WorkerSpec) -> Result<WorkerHandle, WorkerExitError> {
        let context = WorkerContext::new(
            spec.worker_id.clone(),
            spec.chunk.clone(),
            self.settings.clone(),
        );
        let payload =
            serde_json::to_vec(&context).map_err(|e| WorkerExitError::Io(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("PRICEFEED_WORKER_ID", &spec.worker_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                WorkerExitError::SpawnFailed(format!("{}: {e}", self.program.display()))
            })?;

        debug!(
            worker_id = %spec.worker_id,
            pid = child.id(),
            items = spec.chunk.len(),
            "Worker process spawned"
        );

        if let Some(mut stdin) = child.stdin.take() {
            let worker_id = spec.worker_id.clone();
            tokio::spawn(async move {
                // A worker that exits without reading its context shows up in its exit status
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!(worker_id = %worker_id, error = %e, "Could not deliver worker context");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let worker_id = spec.worker_id.clone();
        let (handle, reporter) = WorkerHandle::channel(spec);

        let stdout = child.stdout.take();
        let messages = reporter.message_sender();
        let reader_worker_id = worker_id.clone();
        let reader = tokio::spawn(async move {
            let Some(stdout) = stdout else { return };
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match WorkerMessage::parse_line(&line) {
                    Some(message) => {
                        let _ = messages.send(message).await;
                    }
                    None if line.trim().is_empty() => {}
                    None => debug!(worker_id = %reader_worker_id, output = %line, "Worker output"),
                }
            }
        });

        let timeout = self.timeout;
        tokio::spawn(async move {
            let status = match timeout {
                Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                    Ok(status) => status,
                    Err(_) => {
                        warn!(
                            worker_id = %worker_id,
                            timeout_secs = limit.as_secs(),
                            "Worker exceeded its timeout, killing it"
                        );
                        if let Err(e) = child.kill().await {
                            warn!(worker_id = %worker_id, error = %e, "Failed to kill worker");
                        }
                        // Grandchildren may still hold stdout open
                        reader.abort();
                        reporter.exit(Err(WorkerExitError::TimedOut {
                            after_secs: limit.as_secs(),
                        }));
                        return;
                    }
                },
                None => child.wait().await,
            };

            // Deliver everything the worker printed before reporting the exit
            let _ = reader.await;

            let result = match status {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => match status.code() {
                    Some(code) => Err(WorkerExitError::NonZeroExit { code }),
                    None => Err(WorkerExitError::Crashed(format!(
                        "terminated without exit code ({status})"
                    ))),
                },
                Err(e) => Err(WorkerExitError::Io(e.to_string())),
            };
            reporter.exit(result);
        });

        Ok(handle)
    }

    fn launcher_name(&self) -> &'static str {
        "process"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> WorkerSpec {
        WorkerSpec::new(0, 1, Chunk::new("USD", vec!["item".to_string()]))
    }

    #[tokio::test]
    async fn test_wait_delivers_queued_messages_before_exit() {
        let (mut handle, reporter) = WorkerHandle::channel(spec());
        reporter
            .send(WorkerMessage::Progress {
                processed: 1,
                total: 1,
            })
            .await;
        reporter.exit(Ok(()));

        let mut seen = Vec::new();
        let result = handle.wait(|m| seen.push(m.clone())).await;
        assert!(result.is_ok());
        assert_eq!(seen.len(), 1);
        assert_eq!(handle.state(), WorkerState::Exited);
    }

    #[tokio::test]
    async fn test_dropped_reporter_is_a_crash() {
        let (mut handle, reporter) = WorkerHandle::channel(spec());
        drop(reporter);
        let result = handle.wait(|_| {}).await;
        assert!(matches!(result, Err(WorkerExitError::Crashed(_))));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let launcher = ProcessLauncher::new(
            "/nonexistent/price_worker",
            WorkerSettings::from_config(&PricefeedConfig::default()),
        );
        let err = launcher.launch(spec()).await.unwrap_err();
        assert!(matches!(err, WorkerExitError::SpawnFailed(_)));
    }

    #[test]
    fn test_worker_ids_name_lane_and_generation() {
        assert_eq!(spec().worker_id, "lane0-gen1");
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn sh(script: &str) -> ProcessLauncher {
            ProcessLauncher::new("sh", WorkerSettings::from_config(&PricefeedConfig::default()))
                .with_args(["-c", script])
        }

        #[tokio::test]
        async fn test_clean_exit_with_messages() {
            let launcher = sh(
                r#"cat >/dev/null; echo '{"event":"completed","updated":1,"failed":0,"cache_stale":false}'"#,
            );
            let mut handle = launcher.launch(spec()).await.unwrap();

            let mut seen = Vec::new();
            let result = handle.wait(|m| seen.push(m.clone())).await;
            assert!(result.is_ok());
            assert_eq!(
                seen,
                vec![WorkerMessage::Completed {
                    updated: 1,
                    failed: 0,
                    cache_stale: false
                }]
            );
        }

        #[tokio::test]
        async fn test_non_zero_exit() {
            let mut handle = sh("exit 3").launch(spec()).await.unwrap();
            assert_eq!(
                handle.wait(|_| {}).await,
                Err(WorkerExitError::NonZeroExit { code: 3 })
            );
        }

        #[tokio::test]
        async fn test_hung_worker_is_killed() {
            let launcher = sh("sleep 30").with_timeout(Some(Duration::from_millis(200)));
            let mut handle = launcher.launch(spec()).await.unwrap();
            assert!(matches!(
                handle.wait(|_| {}).await,
                Err(WorkerExitError::TimedOut { .. })
            ));
        }
    }
}
