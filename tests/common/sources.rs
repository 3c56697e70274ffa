use async_trait::async_trait;
use parking_lot::Mutex;
use pricefeed_core::ingestion::{Chunk, ChunkSource, ChunkSourceError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Hands out a fixed script of chunks, then only empty chunks
#[derive(Debug, Default)]
pub struct ScriptedChunkSource {
    script: Mutex<VecDeque<Result<Vec<String>, String>>>,
    fetches: AtomicUsize,
    acknowledged: Mutex<Vec<Chunk>>,
}

impl ScriptedChunkSource {
    pub fn with_chunks(chunks: Vec<Vec<&str>>) -> Self {
        let script = chunks
            .into_iter()
            .map(|names| Ok(names.into_iter().map(String::from).collect()))
            .collect();
        Self {
            script: Mutex::new(script),
            ..Self::default()
        }
    }

    /// Queue a fetch that fails with a server error
    pub fn push_error(&self, reason: &str) {
        self.script.lock().push_back(Err(reason.to_string()));
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn acknowledged(&self) -> Vec<Chunk> {
        self.acknowledged.lock().clone()
    }
}

#[async_trait]
impl ChunkSource for ScriptedChunkSource {
    async fn next_chunk(&self, limit: usize, currency: &str) -> Result<Chunk, ChunkSourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().pop_front() {
            Some(Ok(mut names)) => {
                names.truncate(limit);
                Ok(Chunk::new(currency, names))
            }
            Some(Err(body)) => Err(ChunkSourceError::Status { status: 500, body }),
            None => Ok(Chunk::empty(currency)),
        }
    }

    async fn acknowledge(&self, chunk: &Chunk) {
        self.acknowledged.lock().push(chunk.clone());
    }

    fn source_name(&self) -> &'static str {
        "scripted"
    }
}
