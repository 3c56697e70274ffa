//! Worker to pool messages
//!
//! A worker reports progress as one JSON object per stdout line, tagged by
//! `event`. The pool only logs these; scheduling never depends on them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerMessage {
    Started { worker_id: String, items: usize },
    Progress { processed: usize, total: usize },
    Completed {
        updated: usize,
        failed: usize,
        cache_stale: bool,
    },
    Failed { reason: String },
}

impl WorkerMessage {
    /// Encode as a single line, without the trailing newline
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode one line; blank lines and non-protocol output yield `None`
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        serde_json::from_str(line).ok()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}
