//! The agent loop state machine.
//!
//! One iteration is THINKING -> EXECUTING -> VERIFYING -> LEARNING. The
//! breaker is consulted before any new work; every mutating operation is
//! classified, gated, and applied under the iteration's transaction; the
//! verification result decides commit or rollback. Errors escaping a
//! phase roll the transaction back and count as a failure instead of
//! crashing the run — except a failed rollback, which is fatal.

use crate::agent::executor::{ExecContext, ExecutorRegistry};
use crate::agent::provider::{ActionContext, ActionProvider, NextAction};
use crate::approval::{ApprovalQueue, GateDecision, ShadowConfig};
use crate::breaker::{BreakerState, CircuitBreaker};
use crate::config::WardenConfig;
use crate::domain::{
    FinalReport, IterationOutcome, LoopIteration, LoopPhase, Operation, OperationKind,
    OperationStatus, RiskTier, TerminalState,
};
use crate::error::Result;
use crate::memory::{MemoryStore, OutcomePattern};
use crate::risk::RiskClassifier;
use crate::state::{StateDir, append_jsonl};
use crate::tasks::{TaskRunner, TaskStatus, TaskType};
use crate::txn::TransactionManager;
use crate::verify::VerifyLevel;
use std::sync::Arc;
use std::time::{Duration, Instant};

const BLOCKED_HINT: &str = "circuit breaker is open; run `warden breaker reset` once the underlying failures are addressed";
const ROLLBACK_HINT: &str = "savepoint restore failed; inspect the working tree manually before retrying";

struct BatchOutcome {
    any_executed: bool,
}

/// The orchestrator for one `run` invocation.
pub struct AgentLoop {
    config: WardenConfig,
    state: StateDir,
    provider: Arc<dyn ActionProvider>,
    tasks: TaskRunner,
    breaker: Arc<CircuitBreaker>,
    queue: Arc<ApprovalQueue>,
    transactions: TransactionManager,
    classifier: RiskClassifier,
    executor: ExecutorRegistry,
    exec_ctx: ExecContext,
    memory: Arc<dyn MemoryStore>,
}

impl AgentLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: WardenConfig,
        state: StateDir,
        provider: Arc<dyn ActionProvider>,
        tasks: TaskRunner,
        breaker: Arc<CircuitBreaker>,
        queue: Arc<ApprovalQueue>,
        transactions: TransactionManager,
        classifier: RiskClassifier,
        exec_ctx: ExecContext,
        memory: Arc<dyn MemoryStore>,
    ) -> Self {
        Self {
            config,
            state,
            provider,
            tasks,
            breaker,
            queue,
            transactions,
            classifier,
            executor: ExecutorRegistry::standard(),
            exec_ctx,
            memory,
        }
    }

    /// Drive the state machine to a terminal state.
    pub async fn run(&mut self, task: &str) -> Result<FinalReport> {
        let started = Instant::now();
        let budget = self.config.agent_loop.max_wall_clock();
        let max_iterations = self.config.agent_loop.max_iterations;

        let mut executed: Vec<Operation> = Vec::new();
        let mut rejected: Vec<Operation> = Vec::new();
        let mut failed: Vec<Operation> = Vec::new();
        let mut iterations = 0u32;
        let mut feedback: Option<String> = None;

        let (terminal, reason, remediation) = loop {
            if !self.breaker.allow_request() {
                break (
                    TerminalState::Blocked,
                    Some("circuit breaker is open".to_string()),
                    Some(BLOCKED_HINT.to_string()),
                );
            }
            if iterations >= max_iterations {
                break (
                    TerminalState::TimedOut,
                    Some(format!("iteration cap of {} reached", max_iterations)),
                    None,
                );
            }
            if started.elapsed() >= budget {
                break (
                    TerminalState::TimedOut,
                    Some(format!("wall-clock budget of {}s exhausted", budget.as_secs())),
                    None,
                );
            }

            iterations += 1;
            let mut iteration = LoopIteration::begin(iterations);
            log::info!("Iteration {}: thinking", iterations);

            // THINKING
            let context = ActionContext {
                task: task.to_string(),
                iteration: iterations,
                feedback: feedback.take(),
            };
            let action = match tokio::time::timeout(
                self.config.agent_loop.provider_timeout(),
                self.provider.next_action(&context),
            )
            .await
            {
                Ok(Ok(action)) => action,
                Ok(Err(e)) => {
                    log::warn!("Provider error: {}", e);
                    self.breaker.record_failure();
                    feedback = Some(format!("provider error: {}", e));
                    self.learn(task, false, feedback.clone());
                    continue;
                }
                Err(_) => {
                    log::warn!("Provider call timed out");
                    self.breaker.record_failure();
                    feedback = Some("provider call timed out".to_string());
                    self.learn(task, false, feedback.clone());
                    continue;
                }
            };

            let operations = match action {
                NextAction::Done { summary } => {
                    break (TerminalState::Complete, Some(summary), None);
                }
                NextAction::Operations(ops) => ops,
            };
            if operations.is_empty() {
                continue;
            }

            // EXECUTING
            iteration.phase = LoopPhase::Executing;
            let mut txn_id: Option<String> = None;
            let batch = self
                .execute_batch(
                    task,
                    &operations,
                    &mut iteration,
                    &mut txn_id,
                    &mut executed,
                    &mut rejected,
                    &mut failed,
                )
                .await;
            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => {
                    log::warn!("Executing phase error: {}", e);
                    if let Some(id) = txn_id.take() {
                        if let Err(rollback_err) = self.transactions.rollback(&id) {
                            break (
                                TerminalState::Failed,
                                Some(rollback_err.to_string()),
                                Some(ROLLBACK_HINT.to_string()),
                            );
                        }
                    }
                    self.breaker.record_failure();
                    feedback = Some(e.to_string());
                    self.learn(task, false, feedback.clone());
                    if self.breaker.state() == BreakerState::Open {
                        break (
                            TerminalState::Blocked,
                            Some("circuit breaker is open".to_string()),
                            Some(BLOCKED_HINT.to_string()),
                        );
                    }
                    continue;
                }
            };

            // VERIFYING
            let mut success = false;
            let mut detail: Option<String> = None;
            if batch.any_executed {
                iteration.phase = LoopPhase::Verifying;
                match self.verify_batch().await {
                    Ok(None) => {
                        // Verification passed: the batch is final.
                        success = true;
                        if let Some(id) = txn_id.take() {
                            if let Err(e) = self.transactions.commit(&id) {
                                log::warn!("Commit failed: {}", e);
                                self.breaker.record_failure();
                                success = false;
                                detail = Some(format!("commit failed: {}", e));
                            }
                        }
                        if success {
                            iteration.outcome = IterationOutcome::Verified;
                        }
                    }
                    Ok(Some(why)) => {
                        detail = Some(why.clone());
                        if let Some(id) = txn_id.take() {
                            if let Err(rollback_err) = self.transactions.rollback(&id) {
                                break (
                                    TerminalState::Failed,
                                    Some(rollback_err.to_string()),
                                    Some(ROLLBACK_HINT.to_string()),
                                );
                            }
                        }
                        iteration.outcome = IterationOutcome::Failed(why);
                    }
                    Err(e) => {
                        detail = Some(e.to_string());
                        if let Some(id) = txn_id.take() {
                            if let Err(rollback_err) = self.transactions.rollback(&id) {
                                break (
                                    TerminalState::Failed,
                                    Some(rollback_err.to_string()),
                                    Some(ROLLBACK_HINT.to_string()),
                                );
                            }
                        }
                        iteration.outcome = IterationOutcome::Failed(e.to_string());
                    }
                }
                if !success {
                    feedback = detail.clone();
                }
            } else {
                // Nothing executed: nothing to verify, no transaction opened.
                detail = Some("no operations were executed".to_string());
                feedback = detail.clone();
                iteration.outcome = IterationOutcome::AllRejected;
            }

            // LEARNING
            iteration.phase = LoopPhase::Learning;
            self.learn(task, success, detail);
            log::info!(
                "Iteration {} finished: {:?} ({} ops)",
                iteration.number,
                iteration.outcome,
                iteration.operations.len()
            );
            if self.breaker.state() == BreakerState::Open {
                break (
                    TerminalState::Blocked,
                    Some("circuit breaker is open".to_string()),
                    Some(BLOCKED_HINT.to_string()),
                );
            }
        };

        let mut report = FinalReport::new(terminal);
        report.iterations = iterations;
        report.executed = executed;
        report.rejected = rejected;
        report.failed = failed;
        report.reason = reason;
        report.remediation = remediation;
        Ok(report)
    }

    /// Classify, gate, and apply one batch of proposed operations.
    #[allow(clippy::too_many_arguments)]
    async fn execute_batch(
        &mut self,
        task: &str,
        operations: &[OperationKind],
        iteration: &mut LoopIteration,
        txn_id: &mut Option<String>,
        executed: &mut Vec<Operation>,
        rejected: &mut Vec<Operation>,
        failed: &mut Vec<Operation>,
    ) -> Result<BatchOutcome> {
        // Re-read the shadow config so level changes apply to this batch.
        let shadow = ShadowConfig::load(&self.state.shadow_path())?;
        let mut any_executed = false;

        for kind in operations {
            let tier = self.classifier.classify(kind);
            let mut op = Operation::new(kind.clone(), tier);
            iteration.operations.push(op.id.clone());
            log::debug!("Operation {} ({}) classified {}", op.id, op.target(), tier);

            match shadow.gate(tier, &op.target()) {
                GateDecision::Block => {
                    op.status = OperationStatus::Rejected;
                    op.decided_by = Some("system".to_string());
                    op.decision_note = Some("matched always-block pattern".to_string());
                    self.archive(&op);
                    rejected.push(op);
                }
                GateDecision::Execute => {
                    self.apply(task, &mut op, txn_id)?;
                    any_executed |= self.finalize(op, executed, failed);
                }
                GateDecision::Queue => {
                    log::info!("Operation {} ({}) awaiting approval", op.id, op.target());
                    self.queue.submit(op.clone())?;
                    let decision = self
                        .queue
                        .wait_for_decision(
                            &op.id,
                            self.config.approval.timeout(),
                            self.config.approval.poll_interval(),
                        )
                        .await?;
                    match decision {
                        Some(d) if d.approve => {
                            op.record_decision(&d);
                            self.apply(task, &mut op, txn_id)?;
                            any_executed |= self.finalize(op, executed, failed);
                        }
                        Some(d) => {
                            // A human "no" is control flow, not a fault.
                            op.record_decision(&d);
                            self.archive(&op);
                            rejected.push(op);
                        }
                        None => {
                            let d = self.queue.auto_reject(&op.id, "approval timeout")?;
                            op.record_decision(&d);
                            self.archive(&op);
                            rejected.push(op);
                            self.breaker.record_failure();
                        }
                    }
                }
            }
        }

        Ok(BatchOutcome { any_executed })
    }

    /// Apply one operation, opening the iteration transaction before the
    /// first mutation.
    fn apply(&mut self, task: &str, op: &mut Operation, txn_id: &mut Option<String>) -> Result<()> {
        if op.tier >= RiskTier::Medium && txn_id.is_none() {
            let id = self.transactions.begin(&format!("batch: {}", task))?;
            *txn_id = Some(id);
        }

        match self.executor.execute(&self.exec_ctx, &op.kind) {
            Ok(output) => {
                op.status = OperationStatus::Executed;
                op.output = Some(output);
                if op.tier >= RiskTier::Medium {
                    if let Some(id) = txn_id.clone() {
                        self.transactions.record_operation(&id, &op.id)?;
                    }
                }
            }
            Err(e) => {
                log::warn!("Operation {} failed: {}", op.id, e);
                op.status = OperationStatus::Failed;
                op.output = Some(e.to_string());
            }
        }
        Ok(())
    }

    /// Archive a finished operation and file it into the right bucket.
    /// Returns true if it executed.
    fn finalize(
        &self,
        op: Operation,
        executed: &mut Vec<Operation>,
        failed: &mut Vec<Operation>,
    ) -> bool {
        self.archive(&op);
        if op.status == OperationStatus::Executed {
            executed.push(op);
            true
        } else {
            // An individual operation failure is recorded and counted but
            // does not stop the loop.
            self.breaker.record_failure();
            failed.push(op);
            false
        }
    }

    /// Dispatch verification to the task runner and wait for the result.
    ///
    /// Returns `Ok(None)` on pass, `Ok(Some(detail))` on fail. The task
    /// itself reports to the breaker exactly once.
    async fn verify_batch(&self) -> Result<Option<String>> {
        let task_id = self.tasks.submit(TaskType::Verify(VerifyLevel::Quick));
        let timeout = Duration::from_secs(self.config.tasks.task_timeout_secs);
        let outcome = self
            .tasks
            .wait(&task_id, timeout, self.config.approval.poll_interval())
            .await?;
        match outcome {
            Some(record) if record.status == TaskStatus::Succeeded => Ok(None),
            Some(record) => Ok(Some(
                record.note.unwrap_or_else(|| "verification failed".to_string()),
            )),
            None => Ok(Some("verification timed out".to_string())),
        }
    }

    fn learn(&self, task: &str, success: bool, detail: Option<String>) {
        let pattern = OutcomePattern::new(task, success, detail);
        if let Err(e) = self.memory.record_outcome(&pattern) {
            log::warn!("Failed to record outcome pattern: {}", e);
        }
    }

    fn archive(&self, op: &Operation) {
        if let Err(e) = append_jsonl(&self.state.operations_archive_path(), op) {
            log::warn!("Failed to archive operation {}: {}", op.id, e);
        }
    }
}
