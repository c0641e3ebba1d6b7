//! Operation records and approval decisions
//!
//! An Operation is a single proposed side-effecting action. Operations are
//! created when a provider tool call is translated, gated by risk tier, and
//! finalized as executed, rejected, or failed. They are archived, never
//! deleted.

use crate::id::generate_operation_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The concrete action an operation proposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OperationKind {
    /// Read a file
    Read { path: PathBuf },
    /// List a directory
    List { path: PathBuf },
    /// Create or overwrite a file
    Write { path: PathBuf, content: String },
    /// Append to a file (created if missing)
    Append { path: PathBuf, content: String },
    /// Delete a file or directory
    Delete { path: PathBuf },
    /// Run a shell command
    Exec { command: String },
    /// Run a VCS (git) command
    Vcs { args: Vec<String> },
}

impl OperationKind {
    /// The target path or command, for display and pattern matching.
    pub fn target(&self) -> String {
        match self {
            OperationKind::Read { path }
            | OperationKind::List { path }
            | OperationKind::Write { path, .. }
            | OperationKind::Append { path, .. }
            | OperationKind::Delete { path } => path.display().to_string(),
            OperationKind::Exec { command } => command.clone(),
            OperationKind::Vcs { args } => format!("git {}", args.join(" ")),
        }
    }

    /// Short kind name for logs and the audit archive.
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Read { .. } => "read",
            OperationKind::List { .. } => "list",
            OperationKind::Write { .. } => "write",
            OperationKind::Append { .. } => "append",
            OperationKind::Delete { .. } => "delete",
            OperationKind::Exec { .. } => "exec",
            OperationKind::Vcs { .. } => "vcs",
        }
    }
}

/// Risk classification for an operation.
///
/// Ordered so that the highest matching tier wins on multiple rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskTier::Low => write!(f, "low"),
            RiskTier::Medium => write!(f, "medium"),
            RiskTier::High => write!(f, "high"),
        }
    }
}

/// Lifecycle status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Awaiting gate routing or an approval decision
    Pending,
    /// Approved by a human, not yet executed
    Approved,
    /// Rejected by a human or auto-rejected on timeout
    Rejected,
    /// Mutation applied successfully
    Executed,
    /// Execution was attempted and failed
    Failed,
}

impl OperationStatus {
    /// Returns true once the operation can be archived.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Rejected | OperationStatus::Executed | OperationStatus::Failed
        )
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Pending => write!(f, "pending"),
            OperationStatus::Approved => write!(f, "approved"),
            OperationStatus::Rejected => write!(f, "rejected"),
            OperationStatus::Executed => write!(f, "executed"),
            OperationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A single proposed side-effecting action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Unique identifier ("op-{timestamp}-{hex}")
    pub id: String,

    /// What the operation does
    #[serde(flatten)]
    pub kind: OperationKind,

    /// Risk tier assigned at classification time
    pub tier: RiskTier,

    /// Current lifecycle status
    pub status: OperationStatus,

    pub created_at: DateTime<Utc>,

    /// Who decided (for queued operations): a user name or "system"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,

    /// Free-text note attached to the decision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_note: Option<String>,

    /// Executor output or failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl Operation {
    /// Create a new pending operation with the given kind and tier.
    pub fn new(kind: OperationKind, tier: RiskTier) -> Self {
        Self {
            id: generate_operation_id(),
            kind,
            tier,
            status: OperationStatus::Pending,
            created_at: Utc::now(),
            decided_by: None,
            decision_note: None,
            output: None,
        }
    }

    /// The target path or command.
    pub fn target(&self) -> String {
        self.kind.target()
    }

    /// Record a decision on this operation.
    pub fn record_decision(&mut self, decision: &ApprovalDecision) {
        self.status = if decision.approve {
            OperationStatus::Approved
        } else {
            OperationStatus::Rejected
        };
        self.decided_by = Some(decision.decided_by.clone());
        self.decision_note = decision.note.clone();
    }
}

/// Human (or system) judgment on a queued operation. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub operation_id: String,
    pub approve: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub decided_by: String,
    pub decided_at: DateTime<Utc>,
}

impl ApprovalDecision {
    /// Create a decision stamped with the current time.
    pub fn new(operation_id: &str, approve: bool, note: Option<String>, decided_by: &str) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            approve,
            note,
            decided_by: decided_by.to_string(),
            decided_at: Utc::now(),
        }
    }
}
