//! Circuit breaker for halting runaway failure loops.
//!
//! Tracks consecutive failures and successes across loop iterations and
//! background task outcomes. While OPEN, no new actions may execute; after
//! a cooldown the breaker probes recovery through HALF_OPEN. All
//! transitions happen behind a single mutex so they are totally ordered
//! even when the main loop and TaskRunner workers report concurrently.

use crate::config::BreakerSection;
use crate::error::Result;
use crate::state::{load_json, save_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

/// Breaker FSM states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation
    Closed,
    /// Failure threshold reached; requests are refused
    Open,
    /// Cooldown elapsed; the next result decides reopen or close
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Persisted breaker state (`circuit_breaker_state.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_transition: DateTime<Utc>,
    pub cooldown_seconds: u64,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_transition: DateTime<Utc>,
}

/// Thread-safe circuit breaker with optional disk persistence.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    cooldown: Duration,
    persist_path: Option<PathBuf>,
}

impl CircuitBreaker {
    /// Create an in-memory breaker from config.
    pub fn new(config: &BreakerSection) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_transition: Utc::now(),
            }),
            failure_threshold: config.failure_threshold,
            cooldown: Duration::from_secs(config.cooldown_secs),
            persist_path: None,
        }
    }

    /// Create a breaker persisted at `path`, restoring prior state if the
    /// file exists.
    pub fn with_persistence(config: &BreakerSection, path: PathBuf) -> Result<Self> {
        let snapshot: Option<BreakerSnapshot> = load_json(&path)?;
        let breaker = Self {
            inner: Mutex::new(match &snapshot {
                Some(snap) => Inner {
                    state: snap.state,
                    consecutive_failures: snap.consecutive_failures,
                    consecutive_successes: snap.consecutive_successes,
                    last_transition: snap.last_transition,
                },
                None => Inner {
                    state: BreakerState::Closed,
                    consecutive_failures: 0,
                    consecutive_successes: 0,
                    last_transition: Utc::now(),
                },
            }),
            failure_threshold: config.failure_threshold,
            cooldown: snapshot
                .map(|s| Duration::from_secs(s.cooldown_seconds))
                .unwrap_or(Duration::from_secs(config.cooldown_secs)),
            persist_path: Some(path),
        };
        breaker.persist(&breaker.inner.lock().unwrap());
        Ok(breaker)
    }

    /// True if a new action may start. Performs the time-based
    /// OPEN -> HALF_OPEN promotion when the cooldown has elapsed.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_half_open(&mut inner);
        inner.state != BreakerState::Open
    }

    /// Current state (after any due cooldown promotion).
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Record a successful outcome.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_half_open(&mut inner);
        inner.consecutive_failures = 0;
        inner.consecutive_successes += 1;
        if inner.state == BreakerState::HalfOpen {
            self.transition(&mut inner, BreakerState::Closed);
            tracing::info!("Circuit breaker closed after successful probe");
        }
        self.persist(&inner);
    }

    /// Record a failed outcome.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_half_open(&mut inner);
        inner.consecutive_successes = 0;
        inner.consecutive_failures += 1;
        match inner.state {
            BreakerState::HalfOpen => {
                // Probe failed: reopen and restart the cooldown.
                self.transition(&mut inner, BreakerState::Open);
                tracing::warn!("Circuit breaker reopened after failed probe");
            }
            BreakerState::Closed if inner.consecutive_failures >= self.failure_threshold => {
                self.transition(&mut inner, BreakerState::Open);
                tracing::warn!(
                    consecutive_failures = inner.consecutive_failures,
                    "Circuit breaker opened"
                );
            }
            _ => {}
        }
        self.persist(&inner);
    }

    /// Operator escape hatch: force CLOSED and clear counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        self.transition(&mut inner, BreakerState::Closed);
        self.persist(&inner);
    }

    /// Remaining cooldown while OPEN.
    pub fn remaining_cooldown(&self) -> Option<Duration> {
        let inner = self.inner.lock().unwrap();
        if inner.state != BreakerState::Open {
            return None;
        }
        let elapsed = (Utc::now() - inner.last_transition)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.cooldown.checked_sub(elapsed)
    }

    /// Snapshot for display and persistence.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().unwrap();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            last_transition: inner.last_transition,
            cooldown_seconds: self.cooldown.as_secs(),
        }
    }

    fn maybe_half_open(&self, inner: &mut Inner) {
        if inner.state != BreakerState::Open {
            return;
        }
        let elapsed = (Utc::now() - inner.last_transition)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if elapsed >= self.cooldown {
            self.transition(inner, BreakerState::HalfOpen);
            tracing::info!("Circuit breaker half-open after cooldown");
        }
    }

    fn transition(&self, inner: &mut Inner, next: BreakerState) {
        inner.state = next;
        inner.last_transition = Utc::now();
    }

    fn persist(&self, inner: &Inner) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let snapshot = BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            last_transition: inner.last_transition,
            cooldown_seconds: self.cooldown.as_secs(),
        };
        if let Err(e) = save_json(path, &snapshot) {
            log::warn!("Failed to persist circuit breaker state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn config(threshold: u32, cooldown_secs: u64) -> BreakerSection {
        BreakerSection {
            failure_threshold: threshold,
            cooldown_secs,
        }
    }

    #[test]
    fn test_starts_closed() {
        let breaker = CircuitBreaker::new(&config(3, 60));
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn test_opens_at_threshold_exactly_once() {
        let breaker = CircuitBreaker::new(&config(3, 60));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow_request());

        // Further failures keep it open, no second transition flapping
        let before = breaker.snapshot().last_transition;
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.snapshot().last_transition, before);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(&config(3, 60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        // Only two consecutive failures since the success
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_cooldown_promotes_to_half_open() {
        let breaker = CircuitBreaker::new(&config(1, 0));
        breaker.record_failure();
        // Zero cooldown: the next gate check promotes immediately
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_half_open_closes_on_success() {
        let breaker = CircuitBreaker::new(&config(1, 0));
        breaker.record_failure();
        assert!(breaker.allow_request()); // promotes to half-open
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_reopens_on_failure() {
        let breaker = CircuitBreaker::new(&config(1, 3600));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        // Force the promotion by pretending the cooldown elapsed
        {
            let mut inner = breaker.inner.lock().unwrap();
            inner.last_transition = Utc::now() - chrono::Duration::hours(2);
        }
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        // Cooldown restarted: not allowed again yet
        assert!(!breaker.allow_request());
        assert!(breaker.remaining_cooldown().is_some());
    }

    #[test]
    fn test_manual_reset() {
        let breaker = CircuitBreaker::new(&config(1, 3600));
        breaker.record_failure();
        assert!(!breaker.allow_request());

        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow_request());
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("circuit_breaker_state.json");

        {
            let breaker =
                CircuitBreaker::with_persistence(&config(2, 30), path.clone()).unwrap();
            breaker.record_failure();
            breaker.record_failure();
            assert_eq!(breaker.state(), BreakerState::Open);
        }

        // Restart: state survives
        let breaker = CircuitBreaker::with_persistence(&config(2, 30), path.clone()).unwrap();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.snapshot().consecutive_failures, 2);
        assert_eq!(breaker.snapshot().cooldown_seconds, 30);
    }

    #[test]
    fn test_snapshot_schema_fields() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("circuit_breaker_state.json");
        let breaker = CircuitBreaker::with_persistence(&config(5, 60), path.clone()).unwrap();
        breaker.record_failure();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["state"], "closed");
        assert_eq!(value["consecutive_failures"], 1);
        assert_eq!(value["consecutive_successes"], 0);
        assert_eq!(value["cooldown_seconds"], 60);
        assert!(value["last_transition"].is_string());
    }

    #[test]
    fn test_concurrent_reports_are_totally_ordered() {
        let breaker = Arc::new(CircuitBreaker::new(&config(1000, 60)));
        let mut handles = Vec::new();
        for i in 0..8 {
            let b = Arc::clone(&breaker);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    if i % 2 == 0 {
                        b.record_failure();
                    } else {
                        b.record_success();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        // No panic, state is one of the legal values, counters consistent
        let snap = breaker.snapshot();
        assert!(snap.consecutive_failures == 0 || snap.consecutive_successes == 0);
    }
}
