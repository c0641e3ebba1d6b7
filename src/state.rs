//! State directory and persistence helpers
//!
//! All persisted core state lives under `.warden/` in the project root:
//! JSON documents for live state (breaker, shadow config, pending
//! operations, transaction stack) and append-only JSONL files for the
//! operation audit archive and memory-store patterns. JSON documents are
//! written atomically (temp file + rename) so a crash never leaves a
//! half-written document behind.

use crate::error::{Result, WardenError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Name of the state directory under the project root.
pub const STATE_DIR_NAME: &str = ".warden";

/// Handle to the `.warden/` state directory.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// Open (creating if needed) the state directory for a project root.
    pub fn open(project_root: impl AsRef<Path>) -> Result<Self> {
        let root = project_root.as_ref().join(STATE_DIR_NAME);
        fs::create_dir_all(&root)
            .map_err(|e| WardenError::Storage(format!("Failed to create {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    /// The state directory itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn breaker_path(&self) -> PathBuf {
        self.root.join("circuit_breaker_state.json")
    }

    pub fn shadow_path(&self) -> PathBuf {
        self.root.join("shadow_config.json")
    }

    pub fn pending_path(&self) -> PathBuf {
        self.root.join("pending_operations.json")
    }

    pub fn transactions_path(&self) -> PathBuf {
        self.root.join("transactions.json")
    }

    pub fn operations_archive_path(&self) -> PathBuf {
        self.root.join("operations.jsonl")
    }

    pub fn decisions_archive_path(&self) -> PathBuf {
        self.root.join("decisions.jsonl")
    }

    pub fn patterns_path(&self) -> PathBuf {
        self.root.join("patterns.jsonl")
    }

    /// Directory for directory-snapshot savepoints.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }
}

/// Atomically write a JSON document (temp file + rename).
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, data)
        .map_err(|e| WardenError::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path)
        .map_err(|e| WardenError::Storage(format!("Failed to rename {}: {}", path.display(), e)))?;
    Ok(())
}

/// Load a JSON document, returning None if the file does not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)
        .map_err(|e| WardenError::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
    let value = serde_json::from_str(&data)?;
    Ok(Some(value))
}

/// Append one record to a JSONL file.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| WardenError::Storage(format!("Failed to open {}: {}", path.display(), e)))?;
    writeln!(file, "{}", serde_json::to_string(record)?)?;
    Ok(())
}

/// Read all records from a JSONL file (empty vec if missing).
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)
        .map_err(|e| WardenError::Storage(format!("Failed to open {}: {}", path.display(), e)))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
