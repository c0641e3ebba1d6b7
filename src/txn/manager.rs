//! Transaction stack management.
//!
//! One open transaction at a time sits on top of a stack (nesting is a
//! stack, not a graph). Commit and rollback each fire at most once per
//! transaction; rolling back an outer transaction implicitly rolls back
//! any inner ones still open, and re-rolling-back is a no-op.

use crate::error::{Result, WardenError};
use crate::id::generate_transaction_id;
use crate::state::{load_json, save_json};
use crate::txn::savepoint::SavepointStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Open,
    Committed,
    RolledBack,
}

/// An atomic unit of work over a savepoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub message: String,
    /// Savepoint reference from the underlying store
    pub savepoint: String,
    pub status: TransactionStatus,
    /// Operation ids in submission order
    pub operations: Vec<String>,
    /// Enclosing transaction, if nested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Persisted transaction log (`transactions.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TransactionLog {
    transactions: Vec<Transaction>,
}

/// Manages the transaction stack over a savepoint store.
pub struct TransactionManager {
    store: Box<dyn SavepointStore>,
    log: TransactionLog,
    path: PathBuf,
}

impl TransactionManager {
    /// Open the manager, restoring the persisted log.
    pub fn open(path: PathBuf, store: Box<dyn SavepointStore>) -> Result<Self> {
        let log = load_json(&path)?.unwrap_or_default();
        Ok(Self { store, log, path })
    }

    /// Begin a transaction. Fails with `TransactionConflict` when the
    /// savepoint store reports an unreliable base (for git: a dirty tree).
    pub fn begin(&mut self, message: &str) -> Result<String> {
        if !self.store.is_clean()? {
            return Err(WardenError::TransactionConflict(
                "working tree is not clean; commit or stash changes before starting a transaction"
                    .to_string(),
            ));
        }

        let savepoint = self.store.create(message)?;
        let transaction = Transaction {
            id: generate_transaction_id(),
            message: message.to_string(),
            savepoint,
            status: TransactionStatus::Open,
            operations: Vec::new(),
            parent_id: self.current().map(|t| t.id.clone()),
            created_at: Utc::now(),
        };
        let id = transaction.id.clone();
        log::info!("Transaction {} started: {}", id, message);
        self.log.transactions.push(transaction);
        self.persist()?;
        Ok(id)
    }

    /// Record an operation as part of an open transaction.
    pub fn record_operation(&mut self, transaction_id: &str, operation_id: &str) -> Result<()> {
        let txn = self.find_mut(transaction_id)?;
        if txn.status != TransactionStatus::Open {
            return Err(WardenError::Transaction(format!(
                "transaction {} is not open",
                transaction_id
            )));
        }
        txn.operations.push(operation_id.to_string());
        self.persist()
    }

    /// Commit the transaction, finalizing its operations and dropping the
    /// savepoint marker. Only the innermost open transaction can commit.
    pub fn commit(&mut self, transaction_id: &str) -> Result<()> {
        let top_id = self
            .current()
            .map(|t| t.id.clone())
            .ok_or_else(|| WardenError::Transaction("no open transaction".to_string()))?;
        if top_id != transaction_id {
            return Err(WardenError::Transaction(format!(
                "transaction {} is not innermost; commit {} first",
                transaction_id, top_id
            )));
        }

        let savepoint = {
            let txn = self.find_mut(transaction_id)?;
            txn.status = TransactionStatus::Committed;
            txn.savepoint.clone()
        };
        self.store.discard(&savepoint)?;
        self.persist()?;
        log::info!("Transaction {} committed", transaction_id);
        Ok(())
    }

    /// Roll back the transaction, restoring the tree to its state at
    /// `begin`. Inner transactions still open are rolled back implicitly.
    /// Idempotent: rolling back an already-rolled-back id succeeds without
    /// side effects.
    pub fn rollback(&mut self, transaction_id: &str) -> Result<()> {
        match self.find(transaction_id)?.status {
            TransactionStatus::RolledBack => return Ok(()),
            TransactionStatus::Committed => {
                return Err(WardenError::Transaction(format!(
                    "transaction {} is already committed",
                    transaction_id
                )));
            }
            TransactionStatus::Open => {}
        }

        // Close inner transactions first (reverse stack order), discarding
        // their savepoints; the target's savepoint subsumes them.
        let open_ids: Vec<String> = self.open_stack().iter().map(|t| t.id.clone()).collect();
        let position = open_ids
            .iter()
            .position(|id| id == transaction_id)
            .ok_or_else(|| {
                WardenError::Transaction(format!("transaction {} is not open", transaction_id))
            })?;

        for inner_id in open_ids[position + 1..].iter().rev() {
            let savepoint = {
                let txn = self.find_mut(inner_id)?;
                txn.status = TransactionStatus::RolledBack;
                txn.savepoint.clone()
            };
            if let Err(e) = self.store.discard(&savepoint) {
                log::warn!("Failed to discard savepoint for {}: {}", inner_id, e);
            }
        }

        let savepoint = self.find(transaction_id)?.savepoint.clone();
        self.store
            .restore(&savepoint)
            .map_err(|e| WardenError::RollbackFailure(e.to_string()))?;
        if let Err(e) = self.store.discard(&savepoint) {
            log::warn!("Failed to discard savepoint for {}: {}", transaction_id, e);
        }

        let txn = self.find_mut(transaction_id)?;
        txn.status = TransactionStatus::RolledBack;
        self.persist()?;
        log::info!("Transaction {} rolled back", transaction_id);
        Ok(())
    }

    /// The innermost open transaction.
    pub fn current(&self) -> Option<&Transaction> {
        self.open_stack().last().copied()
    }

    /// Look up a transaction by id.
    pub fn get(&self, transaction_id: &str) -> Option<&Transaction> {
        self.log
            .transactions
            .iter()
            .find(|t| t.id == transaction_id)
    }

    /// Open transactions, outermost first.
    pub fn open_stack(&self) -> Vec<&Transaction> {
        self.log
            .transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Open)
            .collect()
    }

    fn find(&self, transaction_id: &str) -> Result<&Transaction> {
        self.get(transaction_id).ok_or_else(|| {
            WardenError::Transaction(format!("unknown transaction {}", transaction_id))
        })
    }

    fn find_mut(&mut self, transaction_id: &str) -> Result<&mut Transaction> {
        self.log
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction_id)
            .ok_or_else(|| {
                WardenError::Transaction(format!("unknown transaction {}", transaction_id))
            })
    }

    fn persist(&self) -> Result<()> {
        save_json(&self.path, &self.log)
    }
}
