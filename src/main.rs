use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use warden::agent::{AgentLoop, ExecContext, MockActionProvider, NextAction};
use warden::approval::{ApprovalQueue, ShadowConfig, ShadowLevel};
use warden::breaker::CircuitBreaker;
use warden::cli::Cli;
use warden::cli::commands::{
    BreakerCommands, Commands, LoopCommands, ShadowCommands, TaskCommands, TransactionCommands,
};
use warden::config::WardenConfig;
use warden::memory::{FileMemoryStore, MemoryStore};
use warden::risk::{RiskClassifier, RiskPolicy};
use warden::state::StateDir;
use warden::tasks::{TaskRunner, TaskStatus, TaskType};
use warden::txn::{DirSnapshots, GitSavepoints, SavepointStore, TransactionManager};
use warden::verify::{CommandVerifier, Verifier};

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("warden")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("warden.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Pick the savepoint mechanism for this tree.
fn savepoint_store(root: &Path, state: &StateDir) -> Box<dyn SavepointStore> {
    if root.join(".git").exists() {
        Box::new(GitSavepoints::new(root))
    } else {
        Box::new(DirSnapshots::new(root, state.snapshots_dir()))
    }
}

fn decided_by() -> String {
    std::env::var("USER").unwrap_or_else(|_| "operator".to_string())
}

fn open_transactions(root: &Path, state: &StateDir) -> Result<TransactionManager> {
    TransactionManager::open(state.transactions_path(), savepoint_store(root, state))
        .map_err(|e| eyre!("Failed to open transaction log: {}", e))
}

fn open_breaker(config: &WardenConfig, state: &StateDir) -> Result<Arc<CircuitBreaker>> {
    let breaker = CircuitBreaker::with_persistence(&config.breaker, state.breaker_path())
        .map_err(|e| eyre!("Failed to load circuit breaker state: {}", e))?;
    Ok(Arc::new(breaker))
}

fn build_verifier(config: &WardenConfig, root: &Path) -> Arc<dyn Verifier> {
    Arc::new(CommandVerifier::new(
        config.verify.quick_command.as_str(),
        config.verify.full_command.as_str(),
        root,
        Duration::from_secs(config.tasks.task_timeout_secs),
    ))
}

fn handle_shadow_command(
    command: &ShadowCommands,
    state: &StateDir,
) -> Result<()> {
    let shadow_path = state.shadow_path();
    match command {
        ShadowCommands::Status => {
            let shadow = ShadowConfig::load(&shadow_path)?;
            let queue = ApprovalQueue::open(state)?;
            println!("level: {}", shadow.level.to_string().cyan());
            println!("pending operations: {}", queue.list_pending().len());
            if !shadow.auto_approve_patterns.is_empty() {
                println!("auto-approve: {}", shadow.auto_approve_patterns.join(", "));
            }
            if !shadow.always_block_patterns.is_empty() {
                println!("always-block: {}", shadow.always_block_patterns.join(", "));
            }
        }
        ShadowCommands::SetLevel { level } => {
            let parsed: ShadowLevel = level.parse().map_err(|e: String| eyre!(e))?;
            let mut shadow = ShadowConfig::load(&shadow_path)?;
            shadow.level = parsed;
            shadow.save(&shadow_path)?;
            println!("{} {}", "Level set to".green(), parsed);
        }
        ShadowCommands::ListPending => {
            let queue = ApprovalQueue::open(state)?;
            let pending = queue.list_pending();
            if pending.is_empty() {
                println!("{}", "No pending operations".yellow());
            }
            for op in pending {
                println!(
                    "{}  {}  [{}]  {}",
                    op.id,
                    op.kind.name(),
                    op.tier,
                    op.target()
                );
            }
        }
        ShadowCommands::Approve { id, note } => {
            let queue = ApprovalQueue::open(state)?;
            queue.decide(id, true, note.clone(), &decided_by())?;
            println!("{} {}", "Approved:".green(), id);
        }
        ShadowCommands::Reject { id, note } => {
            let queue = ApprovalQueue::open(state)?;
            queue.decide(id, false, note.clone(), &decided_by())?;
            println!("{} {}", "Rejected:".red(), id);
        }
        ShadowCommands::Clear => {
            let queue = ApprovalQueue::open(state)?;
            let count = queue.clear()?;
            println!("Cleared {} pending operations", count);
        }
    }
    Ok(())
}

fn handle_transaction_command(
    command: &TransactionCommands,
    root: &Path,
    state: &StateDir,
) -> Result<()> {
    let mut transactions = open_transactions(root, state)?;
    match command {
        TransactionCommands::Start { message } => {
            let message = message.as_deref().unwrap_or("manual transaction");
            let id = transactions.begin(message)?;
            println!("{} {}", "Transaction started:".green(), id);
        }
        TransactionCommands::Commit => {
            let id = transactions
                .current()
                .map(|t| t.id.clone())
                .ok_or_else(|| eyre!("no open transaction"))?;
            transactions.commit(&id)?;
            println!("{} {}", "Committed:".green(), id);
        }
        TransactionCommands::Rollback { id } => {
            let id = match id {
                Some(id) => id.clone(),
                None => transactions
                    .current()
                    .map(|t| t.id.clone())
                    .ok_or_else(|| eyre!("no open transaction"))?,
            };
            transactions.rollback(&id)?;
            println!("{} {}", "Rolled back:".yellow(), id);
        }
    }
    Ok(())
}

async fn handle_task_command(
    command: &TaskCommands,
    config: &WardenConfig,
    root: &Path,
    state: &StateDir,
) -> Result<()> {
    let breaker = open_breaker(config, state)?;
    let runner = TaskRunner::new(config.tasks.pool_size, build_verifier(config, root), breaker);

    match command {
        TaskCommands::Submit { task_type, args } => {
            let task_type = TaskType::parse(task_type, args)?;
            let id = runner.submit(task_type);
            println!("Submitted {}", id);

            let timeout = Duration::from_secs(config.tasks.task_timeout_secs + 5);
            match runner.wait(&id, timeout, Duration::from_millis(100)).await? {
                Some(record) => {
                    let status = if record.status == TaskStatus::Succeeded {
                        record.status.to_string().green()
                    } else {
                        record.status.to_string().red()
                    };
                    println!("{}: {}", id, status);
                    if let Some(note) = record.note {
                        println!("{}", note);
                    }
                }
                None => println!("{}", "Task did not finish in time".red()),
            }
        }
        TaskCommands::Status { id } => match runner.status(id) {
            Some(record) => {
                println!("{}: {} ({:.0}%)", record.id, record.status, record.progress * 100.0);
                if let Some(note) = record.note {
                    println!("{}", note);
                }
            }
            None => println!("{}", "No such task in this session".yellow()),
        },
        TaskCommands::List { status } => {
            let filter = match status.as_deref() {
                None => None,
                Some("queued") => Some(TaskStatus::Queued),
                Some("running") => Some(TaskStatus::Running),
                Some("succeeded") => Some(TaskStatus::Succeeded),
                Some("failed") => Some(TaskStatus::Failed),
                Some(other) => return Err(eyre!("unknown status filter: {}", other)),
            };
            let records = runner.list(filter);
            if records.is_empty() {
                println!("{}", "No tasks in this session".yellow());
            }
            for record in records {
                println!("{}  {}  {}", record.id, record.task_type, record.status);
            }
        }
        TaskCommands::Cancel { id } => {
            if runner.cancel(id) {
                println!("{} {}", "Cancelled:".yellow(), id);
            } else {
                println!("{} {}", "Could not cancel:".red(), id);
            }
        }
    }
    Ok(())
}

fn load_script(path: &Path) -> Result<Vec<NextAction>> {
    let content = fs::read_to_string(path)
        .context(format!("Failed to read script {}", path.display()))?;
    serde_json::from_str(&content).context("Failed to parse action script")
}

async fn handle_loop_run(
    task: &str,
    max_iterations: Option<u32>,
    timeout: Option<u64>,
    script: Option<&PathBuf>,
    mut config: WardenConfig,
    root: &Path,
    state: &StateDir,
) -> Result<i32> {
    if let Some(cap) = max_iterations {
        config.agent_loop.max_iterations = cap;
    }
    if let Some(secs) = timeout {
        config.agent_loop.max_wall_clock_secs = secs;
    }

    let provider = match script {
        Some(path) => MockActionProvider::new(load_script(path)?),
        None => {
            println!(
                "{}",
                "No action script given; the run completes immediately. Wire a real provider through the library API or pass --script."
                    .yellow()
            );
            MockActionProvider::done()
        }
    };

    let breaker = open_breaker(&config, state)?;
    let queue = Arc::new(ApprovalQueue::open(state)?);
    let transactions = open_transactions(root, state)?;
    let policy = RiskPolicy::from_config(&config.risk)?;
    let classifier = RiskClassifier::new(policy, root);
    let tasks = TaskRunner::new(
        config.tasks.pool_size,
        build_verifier(&config, root),
        Arc::clone(&breaker),
    );
    let memory: Arc<dyn MemoryStore> = Arc::new(FileMemoryStore::new(state.patterns_path()));

    let mut agent = AgentLoop::new(
        config,
        state.clone(),
        Arc::new(provider),
        tasks,
        breaker,
        queue,
        transactions,
        classifier,
        ExecContext::new(root),
        memory,
    );

    let report = agent.run(task).await?;
    print!("{}", report.render());
    Ok(report.terminal.exit_code())
}

fn handle_breaker_command(
    command: &BreakerCommands,
    config: &WardenConfig,
    state: &StateDir,
) -> Result<()> {
    let breaker = open_breaker(config, state)?;
    match command {
        BreakerCommands::Status => {
            let snapshot = breaker.snapshot();
            println!("state: {}", snapshot.state.to_string().cyan());
            println!("consecutive failures: {}", snapshot.consecutive_failures);
            println!("consecutive successes: {}", snapshot.consecutive_successes);
            println!("last transition: {}", snapshot.last_transition);
            if let Some(remaining) = breaker.remaining_cooldown() {
                println!("cooldown remaining: {}s", remaining.as_secs());
            }
        }
        BreakerCommands::Reset => {
            breaker.reset();
            println!("{}", "Circuit breaker reset to closed".green());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = WardenConfig::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;

    let root = std::env::current_dir().context("Failed to determine working directory")?;
    let state = StateDir::open(&root).map_err(|e| eyre!("Failed to open state dir: {}", e))?;

    if cli.verbose {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Shadow { command } => handle_shadow_command(command, &state)?,
        Commands::Transaction { command } => handle_transaction_command(command, &root, &state)?,
        Commands::Task { command } => handle_task_command(command, &config, &root, &state).await?,
        Commands::Loop {
            command:
                LoopCommands::Run {
                    task,
                    max_iterations,
                    timeout,
                    script,
                },
        } => {
            let code = handle_loop_run(
                task,
                *max_iterations,
                *timeout,
                script.as_ref(),
                config,
                &root,
                &state,
            )
            .await?;
            std::process::exit(code);
        }
        Commands::Breaker { command } => handle_breaker_command(command, &config, &state)?,
    }

    Ok(())
}
