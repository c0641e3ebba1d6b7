//! CLI command definitions using clap.
//!
//! Subcommand groups:
//! - shadow: approval gating (level, pending operations, decisions)
//! - transaction: savepoint-backed atomic batches
//! - task: background verification tasks
//! - loop: run the agent loop
//! - breaker: circuit breaker state and manual reset

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// warden - safety and control core for an autonomous coding-agent runner
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Approval gating policy and pending operations
    Shadow {
        #[command(subcommand)]
        command: ShadowCommands,
    },

    /// Atomic transactions over the working tree
    Transaction {
        #[command(subcommand)]
        command: TransactionCommands,
    },

    /// Background verification tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// The agent loop
    Loop {
        #[command(subcommand)]
        command: LoopCommands,
    },

    /// Circuit breaker state
    Breaker {
        #[command(subcommand)]
        command: BreakerCommands,
    },
}

/// Approval gating subcommands
#[derive(Subcommand, Debug)]
pub enum ShadowCommands {
    /// Show the current level and pending count
    Status,

    /// Change the gating level (disabled, enabled, strict)
    SetLevel {
        /// New level
        level: String,
    },

    /// List operations awaiting approval
    ListPending,

    /// Approve a pending operation
    Approve {
        /// Operation ID
        id: String,

        /// Free-text note recorded with the decision
        note: Option<String>,
    },

    /// Reject a pending operation
    Reject {
        /// Operation ID
        id: String,

        /// Free-text note recorded with the decision
        note: Option<String>,
    },

    /// Drop all pending operations
    Clear,
}

/// Transaction subcommands
#[derive(Subcommand, Debug)]
pub enum TransactionCommands {
    /// Begin a transaction (fails on a dirty working tree)
    Start {
        /// Savepoint message
        message: Option<String>,
    },

    /// Commit the innermost open transaction
    Commit,

    /// Roll back a transaction (defaults to the innermost open one)
    Rollback {
        /// Transaction ID
        id: Option<String>,
    },
}

/// Task runner subcommands
#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Submit a task and wait for its result
    Submit {
        /// Task type (currently: verify)
        task_type: String,

        /// Type-specific arguments (verify: quick | full)
        args: Vec<String>,
    },

    /// Show one task
    Status {
        /// Task ID
        id: String,
    },

    /// List tasks
    List {
        /// Filter by status (queued, running, succeeded, failed)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Best-effort cancel
    Cancel {
        /// Task ID
        id: String,
    },
}

/// Agent loop subcommands
#[derive(Subcommand, Debug)]
pub enum LoopCommands {
    /// Run the loop on a task until a terminal state
    Run {
        /// Task description
        task: String,

        /// Iteration cap (overrides config)
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Wall-clock budget in seconds (overrides config)
        #[arg(long)]
        timeout: Option<u64>,

        /// JSON file with a scripted action sequence (offline provider)
        #[arg(long)]
        script: Option<PathBuf>,
    },
}

/// Circuit breaker subcommands
#[derive(Subcommand, Debug)]
pub enum BreakerCommands {
    /// Show breaker state and counters
    Status,

    /// Operator escape hatch: force CLOSED and clear counters
    Reset,
}
