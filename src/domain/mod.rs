//! Core domain types for warden
//!
//! Operations, approval decisions, loop iterations, and the final report.

pub mod iteration;
pub mod operation;
pub mod report;

pub use iteration::{IterationOutcome, LoopIteration, LoopPhase};
pub use operation::{ApprovalDecision, Operation, OperationKind, OperationStatus, RiskTier};
pub use report::{FinalReport, TerminalState};
