//! Outcome memory boundary.
//!
//! The LEARNING phase records success/failure patterns so later runs (and
//! the external knowledge subsystem) can query them by signature. The core
//! only needs append and query; the file store keeps patterns as JSONL.

use crate::error::Result;
use crate::state::{append_jsonl, read_jsonl};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Mutex;

/// One recorded outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomePattern {
    /// Stable hash of the task/failure text, used as the query key
    pub signature: String,
    pub task: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl OutcomePattern {
    pub fn new(task: &str, success: bool, detail: Option<String>) -> Self {
        Self {
            signature: signature(task),
            task: task.to_string(),
            success,
            detail,
            recorded_at: Utc::now(),
        }
    }
}

/// Stable signature for a pattern key: first 16 hex chars of sha256.
pub fn signature(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// Memory store, seen from the core.
pub trait MemoryStore: Send + Sync {
    fn record_outcome(&self, pattern: &OutcomePattern) -> Result<()>;
    fn query_patterns(&self, signature: &str) -> Result<Vec<OutcomePattern>>;
}

/// JSONL-backed memory store (`patterns.jsonl`).
#[derive(Debug)]
pub struct FileMemoryStore {
    path: PathBuf,
}

impl FileMemoryStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl MemoryStore for FileMemoryStore {
    fn record_outcome(&self, pattern: &OutcomePattern) -> Result<()> {
        append_jsonl(&self.path, pattern)
    }

    fn query_patterns(&self, signature: &str) -> Result<Vec<OutcomePattern>> {
        let patterns: Vec<OutcomePattern> = read_jsonl(&self.path)?;
        Ok(patterns
            .into_iter()
            .filter(|p| p.signature == signature)
            .collect())
    }
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    patterns: Mutex<Vec<OutcomePattern>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.patterns.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemoryStore for InMemoryStore {
    fn record_outcome(&self, pattern: &OutcomePattern) -> Result<()> {
        self.patterns.lock().unwrap().push(pattern.clone());
        Ok(())
    }

    fn query_patterns(&self, signature: &str) -> Result<Vec<OutcomePattern>> {
        Ok(self
            .patterns
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.signature == signature)
            .cloned()
            .collect())
    }
}
