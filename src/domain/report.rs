//! Terminal states and the final run report.

use crate::domain::operation::Operation;
use serde::{Deserialize, Serialize};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalState {
    /// The provider signaled completion
    Complete,
    /// The circuit breaker is open; no further actions were attempted
    Blocked,
    /// Iteration cap or wall-clock budget exhausted
    TimedOut,
    /// Unrecoverable error (including rollback failure)
    Failed,
}

impl TerminalState {
    /// Process exit code for this terminal state.
    pub fn exit_code(&self) -> i32 {
        match self {
            TerminalState::Complete => 0,
            TerminalState::Failed => 1,
            TerminalState::TimedOut => 2,
            TerminalState::Blocked => 3,
        }
    }
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalState::Complete => write!(f, "complete"),
            TerminalState::Blocked => write!(f, "blocked"),
            TerminalState::TimedOut => write!(f, "timed-out"),
            TerminalState::Failed => write!(f, "failed"),
        }
    }
}

/// The report returned by `AgentLoop::run`.
///
/// Always states the terminal state and the executed/rejected operations;
/// for BLOCKED or FAILED it carries the specific reason and a remediation
/// hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub terminal: TerminalState,
    pub iterations: u32,
    pub executed: Vec<Operation>,
    pub rejected: Vec<Operation>,
    pub failed: Vec<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl FinalReport {
    /// Build an empty report for the given terminal state.
    pub fn new(terminal: TerminalState) -> Self {
        Self {
            terminal,
            iterations: 0,
            executed: Vec::new(),
            rejected: Vec::new(),
            failed: Vec::new(),
            reason: None,
            remediation: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_remediation(mut self, hint: impl Into<String>) -> Self {
        self.remediation = Some(hint.into());
        self
    }

    /// Human-readable summary for the CLI.
    pub fn render(&self) -> String {
        let mut out = format!(
            "terminal state: {}\niterations: {}\nexecuted: {}  rejected: {}  failed: {}\n",
            self.terminal,
            self.iterations,
            self.executed.len(),
            self.rejected.len(),
            self.failed.len(),
        );
        for op in &self.executed {
            out.push_str(&format!("  [executed] {} {}\n", op.kind.name(), op.target()));
        }
        for op in &self.rejected {
            let note = op.decision_note.as_deref().unwrap_or("");
            out.push_str(&format!("  [rejected] {} {} {}\n", op.kind.name(), op.target(), note));
        }
        for op in &self.failed {
            out.push_str(&format!("  [failed] {} {}\n", op.kind.name(), op.target()));
        }
        if let Some(reason) = &self.reason {
            out.push_str(&format!("reason: {}\n", reason));
        }
        if let Some(hint) = &self.remediation {
            out.push_str(&format!("remediation: {}\n", hint));
        }
        out
    }
}
