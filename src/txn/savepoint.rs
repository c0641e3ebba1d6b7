//! Savepoint mechanisms.
//!
//! A savepoint is a recoverable marker of tree state: `create` captures,
//! `restore` brings the tree back byte-for-byte, `discard` drops the
//! marker. `GitSavepoints` anchors on commits and requires a clean tree;
//! `DirSnapshots` copies the tree and works anywhere.

use crate::error::{Result, WardenError};
use crate::id::now_ms;
use crate::state::STATE_DIR_NAME;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Swappable savepoint mechanism.
pub trait SavepointStore: Send + Sync {
    /// Capture the current tree state; returns a savepoint reference.
    fn create(&self, label: &str) -> Result<String>;

    /// Restore the tree to the exact state captured by `savepoint`.
    fn restore(&self, savepoint: &str) -> Result<()>;

    /// Drop a savepoint marker without touching the tree.
    fn discard(&self, savepoint: &str) -> Result<()>;

    /// Whether the tree is a reliable base for a new savepoint.
    fn is_clean(&self) -> Result<bool>;
}

/// Git-backed savepoints: the reference is the HEAD commit at capture
/// time; restore is `reset --hard` plus `clean -fd` (sparing the state
/// directory).
#[derive(Debug)]
pub struct GitSavepoints {
    repo_root: PathBuf,
}

impl GitSavepoints {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .map_err(|e| WardenError::Git(format!("Failed to execute git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WardenError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl SavepointStore for GitSavepoints {
    fn create(&self, label: &str) -> Result<String> {
        let head = self.git(&["rev-parse", "HEAD"])?;
        log::debug!("Savepoint {} at {}", label, head);
        Ok(head)
    }

    fn restore(&self, savepoint: &str) -> Result<()> {
        self.git(&["reset", "--hard", savepoint])?;
        // Remove anything the batch created, but never the state dir.
        self.git(&["clean", "-fd", "-e", STATE_DIR_NAME])?;
        Ok(())
    }

    fn discard(&self, _savepoint: &str) -> Result<()> {
        // Commit-anchored savepoints leave nothing behind.
        Ok(())
    }

    fn is_clean(&self) -> Result<bool> {
        let status = self.git(&["status", "--porcelain"])?;
        // The state dir lives inside the tree but is never part of a batch.
        let dirt = status.lines().any(|line| {
            let path = line.get(3..).unwrap_or("");
            !path.starts_with(STATE_DIR_NAME)
        });
        Ok(!dirt)
    }
}

/// Directory-snapshot savepoints: a full copy of the tree (minus the state
/// dir and `.git`) under `.warden/snapshots/`. Always has a reliable base,
/// so nested transactions work with a dirty tree.
#[derive(Debug)]
pub struct DirSnapshots {
    root: PathBuf,
    snapshots_dir: PathBuf,
}

impl DirSnapshots {
    pub fn new(root: impl Into<PathBuf>, snapshots_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            snapshots_dir: snapshots_dir.into(),
        }
    }

    fn snapshot_path(&self, savepoint: &str) -> PathBuf {
        self.snapshots_dir.join(savepoint)
    }
}

impl SavepointStore for DirSnapshots {
    fn create(&self, label: &str) -> Result<String> {
        let sanitized: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .take(24)
            .collect();
        let savepoint = format!("{}-{}", now_ms(), sanitized);
        let dest = self.snapshot_path(&savepoint);
        fs::create_dir_all(&dest)?;
        copy_tree(&self.root, &dest)?;
        Ok(savepoint)
    }

    fn restore(&self, savepoint: &str) -> Result<()> {
        let source = self.snapshot_path(savepoint);
        if !source.exists() {
            return Err(WardenError::Storage(format!(
                "snapshot {} does not exist",
                savepoint
            )));
        }
        clear_tree(&self.root)?;
        copy_tree(&source, &self.root)?;
        Ok(())
    }

    fn discard(&self, savepoint: &str) -> Result<()> {
        let path = self.snapshot_path(savepoint);
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        Ok(())
    }

    fn is_clean(&self) -> Result<bool> {
        // A full copy is always a reliable base.
        Ok(true)
    }
}

fn is_excluded(name: &std::ffi::OsStr) -> bool {
    name == STATE_DIR_NAME || name == ".git"
}

/// Recursively copy `src` into `dst`, skipping the state dir and `.git`.
fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if is_excluded(&name) {
            continue;
        }
        let from = entry.path();
        let to = dst.join(&name);
        if entry.file_type()?.is_dir() {
            fs::create_dir_all(&to)?;
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

/// Remove everything under `root` except the state dir and `.git`.
fn clear_tree(root: &Path) -> Result<()> {
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if is_excluded(&entry.file_name()) {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
