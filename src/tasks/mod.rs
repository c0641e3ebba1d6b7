//! Background task runner.
//!
//! Long-running verification work (tests, lint, scans) runs off the main
//! loop on a bounded tokio worker pool. Every task that actually executes
//! reports its outcome to the circuit breaker exactly once. Workers only
//! read the tree, never write it, so verification cannot race the loop's
//! mutations.

use crate::breaker::CircuitBreaker;
use crate::error::{Result, WardenError};
use crate::id::generate_task_id;
use crate::verify::{Verifier, VerifyLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Kind of background work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Verify(VerifyLevel),
}

impl TaskType {
    /// Parse a CLI-style `<type> <args>` pair.
    pub fn parse(kind: &str, args: &[String]) -> Result<Self> {
        match kind {
            "verify" => {
                let level = match args.first().map(String::as_str) {
                    None | Some("quick") => VerifyLevel::Quick,
                    Some("full") => VerifyLevel::Full,
                    Some(other) => {
                        return Err(WardenError::Validation(format!(
                            "unknown verify level: {}",
                            other
                        )));
                    }
                };
                Ok(TaskType::Verify(level))
            }
            other => Err(WardenError::Validation(format!(
                "unknown task type: {}",
                other
            ))),
        }
    }

    fn describe(&self) -> String {
        match self {
            TaskType::Verify(VerifyLevel::Quick) => "verify:quick".to_string(),
            TaskType::Verify(VerifyLevel::Full) => "verify:full".to_string(),
        }
    }
}

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Observable record for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub task_type: String,
    pub status: TaskStatus,
    /// Coarse progress: 0.0 queued, 0.5 running, 1.0 finished
    pub progress: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

struct Entry {
    record: TaskRecord,
}

struct RunnerInner {
    tasks: Mutex<HashMap<String, Entry>>,
    semaphore: Arc<Semaphore>,
    breaker: Arc<CircuitBreaker>,
    verifier: Arc<dyn Verifier>,
}

/// Bounded worker pool for verification tasks.
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<RunnerInner>,
}

impl TaskRunner {
    pub fn new(
        pool_size: usize,
        verifier: Arc<dyn Verifier>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                tasks: Mutex::new(HashMap::new()),
                semaphore: Arc::new(Semaphore::new(pool_size.max(1))),
                breaker,
                verifier,
            }),
        }
    }

    /// Submit work; returns immediately with the task id.
    pub fn submit(&self, task_type: TaskType) -> String {
        let id = generate_task_id();
        let record = TaskRecord {
            id: id.clone(),
            task_type: task_type.describe(),
            status: TaskStatus::Queued,
            progress: 0.0,
            note: None,
            created_at: Utc::now(),
            finished_at: None,
        };
        self.inner
            .tasks
            .lock()
            .unwrap()
            .insert(id.clone(), Entry { record });

        let inner = Arc::clone(&self.inner);
        let task_id = id.clone();
        tokio::spawn(async move {
            run_task(inner, task_id, task_type).await;
        });

        id
    }

    /// Current record for a task.
    pub fn status(&self, task_id: &str) -> Option<TaskRecord> {
        self.inner
            .tasks
            .lock()
            .unwrap()
            .get(task_id)
            .map(|e| e.record.clone())
    }

    /// All tasks, optionally filtered by status, oldest first.
    pub fn list(&self, filter: Option<TaskStatus>) -> Vec<TaskRecord> {
        let tasks = self.inner.tasks.lock().unwrap();
        let mut records: Vec<TaskRecord> = tasks
            .values()
            .map(|e| e.record.clone())
            .filter(|r| filter.map_or(true, |f| r.status == f))
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Best-effort cancellation.
    ///
    /// Queued tasks are cancelled and marked failed with a note; they never
    /// ran, so nothing is reported to the breaker. A running task is past
    /// the point of no return: the request is recorded on the task and
    /// `false` is returned rather than silently dropping it.
    pub fn cancel(&self, task_id: &str) -> bool {
        let mut tasks = self.inner.tasks.lock().unwrap();
        let Some(entry) = tasks.get_mut(task_id) else {
            return false;
        };
        match entry.record.status {
            TaskStatus::Queued => {
                entry.record.status = TaskStatus::Failed;
                entry.record.note = Some("cancelled before start".to_string());
                entry.record.progress = 1.0;
                entry.record.finished_at = Some(Utc::now());
                log::info!("Task {} cancelled while queued", task_id);
                true
            }
            TaskStatus::Running => {
                entry.record.note = Some(
                    "cancel requested but task is past the point of no return; not cancellable"
                        .to_string(),
                );
                log::warn!("Task {} cannot be cancelled: already running", task_id);
                false
            }
            _ => false,
        }
    }

    /// Poll until the task reaches a terminal state.
    ///
    /// Returns `None` on timeout with the task still in flight.
    pub async fn wait(
        &self,
        task_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Option<TaskRecord>> {
        let deadline = Instant::now() + timeout;
        loop {
            let record = self.status(task_id).ok_or_else(|| {
                WardenError::Task(format!("unknown task {}", task_id))
            })?;
            if record.status.is_terminal() {
                return Ok(Some(record));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

async fn run_task(inner: Arc<RunnerInner>, task_id: String, task_type: TaskType) {
    let permit = inner
        .semaphore
        .clone()
        .acquire_owned()
        .await
        .expect("semaphore closed");

    // Claim the slot; a task cancelled while queued never runs.
    {
        let mut tasks = inner.tasks.lock().unwrap();
        let Some(entry) = tasks.get_mut(&task_id) else {
            return;
        };
        if entry.record.status != TaskStatus::Queued {
            return;
        }
        entry.record.status = TaskStatus::Running;
        entry.record.progress = 0.5;
    }

    let TaskType::Verify(level) = task_type;
    let outcome = inner.verifier.verify(level).await;

    let mut tasks = inner.tasks.lock().unwrap();
    if let Some(entry) = tasks.get_mut(&task_id) {
        match outcome {
            Ok(report) if report.passed => {
                entry.record.status = TaskStatus::Succeeded;
                entry.record.note = Some(report.details);
                inner.breaker.record_success();
            }
            Ok(report) => {
                entry.record.status = TaskStatus::Failed;
                entry.record.note = Some(report.details);
                inner.breaker.record_failure();
            }
            Err(e) => {
                entry.record.status = TaskStatus::Failed;
                entry.record.note = Some(e.to_string());
                inner.breaker.record_failure();
            }
        }
        entry.record.progress = 1.0;
        entry.record.finished_at = Some(Utc::now());
    }
    drop(permit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerSection;
    use crate::verify::{MockVerifier, VerifyReport};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(&BreakerSection {
            failure_threshold: 1000,
            cooldown_secs: 60,
        }))
    }

    fn runner(pool: usize, verifier: Arc<dyn Verifier>) -> (TaskRunner, Arc<CircuitBreaker>) {
        let breaker = breaker();
        (TaskRunner::new(pool, verifier, Arc::clone(&breaker)), breaker)
    }

    /// Verifier that tracks the number of concurrent executions.
    struct ConcurrencyProbe {
        current: AtomicUsize,
        max_seen: AtomicUsize,
    }

    impl ConcurrencyProbe {
        fn new() -> Self {
            Self {
                current: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Verifier for ConcurrencyProbe {
        async fn verify(&self, _level: VerifyLevel) -> Result<VerifyReport> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(VerifyReport::pass("ok"))
        }
    }

    #[tokio::test]
    async fn test_submit_and_wait_success() {
        let (runner, breaker) = runner(2, Arc::new(MockVerifier::passing()));
        let id = runner.submit(TaskType::Verify(VerifyLevel::Quick));

        let record = runner
            .wait(&id, Duration::from_secs(5), Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, TaskStatus::Succeeded);
        assert_eq!(record.progress, 1.0);
        assert_eq!(breaker.snapshot().consecutive_successes, 1);
    }

    #[tokio::test]
    async fn test_failed_task_reports_breaker() {
        let (runner, breaker) = runner(2, Arc::new(MockVerifier::failing("tests red")));
        let id = runner.submit(TaskType::Verify(VerifyLevel::Full));

        let record = runner
            .wait(&id, Duration::from_secs(5), Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.note.unwrap().contains("tests red"));
        assert_eq!(breaker.snapshot().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_pool_bound_respected() {
        let probe = Arc::new(ConcurrencyProbe::new());
        let (runner, breaker) = runner(3, Arc::clone(&probe) as Arc<dyn Verifier>);

        let ids: Vec<String> = (0..100)
            .map(|_| runner.submit(TaskType::Verify(VerifyLevel::Quick)))
            .collect();

        for id in &ids {
            let record = runner
                .wait(id, Duration::from_secs(30), Duration::from_millis(5))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(record.status, TaskStatus::Succeeded);
        }

        assert!(probe.max_seen.load(Ordering::SeqCst) <= 3);
        // Exactly one breaker report per task
        assert_eq!(breaker.snapshot().consecutive_successes, 100);
    }

    #[tokio::test]
    async fn test_cancel_queued_task() {
        // Pool of 1; the first task blocks the slot while we cancel the second.
        let probe = Arc::new(ConcurrencyProbe::new());
        let (runner, breaker) = runner(1, Arc::clone(&probe) as Arc<dyn Verifier>);

        let first = runner.submit(TaskType::Verify(VerifyLevel::Quick));
        let second = runner.submit(TaskType::Verify(VerifyLevel::Quick));

        // Cancel the queued one immediately
        let cancelled = runner.cancel(&second);
        // Either it was still queued (cancel succeeds) or it raced to running
        let record = runner
            .wait(&second, Duration::from_secs(5), Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();
        if cancelled {
            assert_eq!(record.status, TaskStatus::Failed);
            assert!(record.note.unwrap().contains("cancelled"));
        }

        runner
            .wait(&first, Duration::from_secs(5), Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();

        // A cancelled-before-start task must not report to the breaker
        let snap = breaker.snapshot();
        let reports = snap.consecutive_successes + snap.consecutive_failures;
        if cancelled {
            assert_eq!(reports, 1);
        } else {
            assert_eq!(reports, 2);
        }
    }

    #[tokio::test]
    async fn test_cancel_running_task_refused() {
        struct SlowVerifier;
        #[async_trait]
        impl Verifier for SlowVerifier {
            async fn verify(&self, _level: VerifyLevel) -> Result<VerifyReport> {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(VerifyReport::pass("ok"))
            }
        }

        let (runner, _breaker) = runner(1, Arc::new(SlowVerifier));
        let id = runner.submit(TaskType::Verify(VerifyLevel::Quick));

        // Wait until it is running
        loop {
            if runner.status(&id).unwrap().status == TaskStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert!(!runner.cancel(&id));
        let note = runner.status(&id).unwrap().note.unwrap();
        assert!(note.contains("not cancellable"));

        // The task still completes and keeps its terminal status
        let record = runner
            .wait(&id, Duration::from_secs(5), Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let (runner, _breaker) = runner(2, Arc::new(MockVerifier::passing()));
        let id = runner.submit(TaskType::Verify(VerifyLevel::Quick));
        runner
            .wait(&id, Duration::from_secs(5), Duration::from_millis(5))
            .await
            .unwrap();

        assert_eq!(runner.list(None).len(), 1);
        assert_eq!(runner.list(Some(TaskStatus::Succeeded)).len(), 1);
        assert!(runner.list(Some(TaskStatus::Failed)).is_empty());
    }

    #[tokio::test]
    async fn test_wait_unknown_task_errors() {
        let (runner, _breaker) = runner(1, Arc::new(MockVerifier::passing()));
        let result = runner
            .wait("task-unknown", Duration::from_millis(20), Duration::from_millis(5))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_task_type_parse() {
        assert_eq!(
            TaskType::parse("verify", &[]).unwrap(),
            TaskType::Verify(VerifyLevel::Quick)
        );
        assert_eq!(
            TaskType::parse("verify", &["full".to_string()]).unwrap(),
            TaskType::Verify(VerifyLevel::Full)
        );
        assert!(TaskType::parse("verify", &["bogus".to_string()]).is_err());
        assert!(TaskType::parse("deploy", &[]).is_err());
    }
}
