//! Persistent approval queue.
//!
//! Pending operations live in `pending_operations.json`; every recorded
//! decision is appended to `decisions.jsonl`. The decision archive doubles
//! as the cross-process channel: a waiter polls it from disk, so an
//! approval granted by a separate CLI invocation becomes visible to the
//! blocked loop within one poll interval.

use crate::domain::{ApprovalDecision, Operation, OperationStatus};
use crate::error::{Result, WardenError};
use crate::state::{StateDir, append_jsonl, load_json, read_jsonl, save_json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Queue of operations awaiting a human decision.
#[derive(Debug)]
pub struct ApprovalQueue {
    pending: Mutex<HashMap<String, Operation>>,
    pending_path: PathBuf,
    decisions_path: PathBuf,
}

impl ApprovalQueue {
    /// Open the queue, loading any pending operations from disk.
    pub fn open(state: &StateDir) -> Result<Self> {
        let pending_path = state.pending_path();
        let decisions_path = state.decisions_archive_path();

        let records: Vec<Operation> = load_json(&pending_path)?.unwrap_or_default();
        let pending = records.into_iter().map(|op| (op.id.clone(), op)).collect();

        Ok(Self {
            pending: Mutex::new(pending),
            pending_path,
            decisions_path,
        })
    }

    /// Submit an operation for approval. Visible in `list_pending` from the
    /// moment this returns.
    pub fn submit(&self, operation: Operation) -> Result<()> {
        if operation.status != OperationStatus::Pending {
            return Err(WardenError::Approval(format!(
                "operation {} is {}, not pending",
                operation.id, operation.status
            )));
        }
        let mut pending = self.pending.lock().unwrap();
        pending.insert(operation.id.clone(), operation);
        self.persist(&pending)
    }

    /// Record a final decision for a pending operation.
    ///
    /// Decisions are final: deciding an unknown or already-decided id is an
    /// error.
    pub fn decide(
        &self,
        operation_id: &str,
        approve: bool,
        note: Option<String>,
        decided_by: &str,
    ) -> Result<ApprovalDecision> {
        let mut pending = self.pending.lock().unwrap();
        let mut operation = pending.remove(operation_id).ok_or_else(|| {
            WardenError::Approval(format!(
                "no pending operation {} (unknown or already decided)",
                operation_id
            ))
        })?;

        let decision = ApprovalDecision::new(operation_id, approve, note, decided_by);
        operation.record_decision(&decision);

        append_jsonl(&self.decisions_path, &decision)?;
        self.persist(&pending)?;
        log::info!(
            "Operation {} {} by {}",
            operation_id,
            if approve { "approved" } else { "rejected" },
            decided_by
        );
        Ok(decision)
    }

    /// Pending operations, oldest first.
    pub fn list_pending(&self) -> Vec<Operation> {
        let pending = self.pending.lock().unwrap();
        let mut operations: Vec<Operation> = pending.values().cloned().collect();
        operations.sort_by_key(|op| op.created_at);
        operations
    }

    /// Drop all pending operations. Returns how many were cleared.
    pub fn clear(&self) -> Result<usize> {
        let mut pending = self.pending.lock().unwrap();
        let count = pending.len();
        pending.clear();
        self.persist(&pending)?;
        Ok(count)
    }

    /// Look up a recorded decision for an operation, reading the archive
    /// from disk so decisions made by other processes are seen.
    pub fn find_decision(&self, operation_id: &str) -> Result<Option<ApprovalDecision>> {
        let decisions: Vec<ApprovalDecision> = read_jsonl(&self.decisions_path)?;
        Ok(decisions
            .into_iter()
            .find(|d| d.operation_id == operation_id))
    }

    /// Block (bounded) until a decision for `operation_id` arrives.
    ///
    /// Returns `None` on timeout; the caller is expected to auto-reject.
    pub async fn wait_for_decision(
        &self,
        operation_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Option<ApprovalDecision>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(decision) = self.find_decision(operation_id)? {
                // Another process decided: drop our pending copy too.
                let mut pending = self.pending.lock().unwrap();
                if pending.remove(operation_id).is_some() {
                    self.persist(&pending)?;
                }
                return Ok(Some(decision));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Auto-reject after an approval timeout, recorded as a system decision.
    pub fn auto_reject(&self, operation_id: &str, note: &str) -> Result<ApprovalDecision> {
        self.decide(operation_id, false, Some(note.to_string()), "system")
    }

    fn persist(&self, pending: &HashMap<String, Operation>) -> Result<()> {
        let mut records: Vec<&Operation> = pending.values().collect();
        records.sort_by_key(|op| op.created_at);
        save_json(&self.pending_path, &records)
    }
}
