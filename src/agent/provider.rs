//! Action provider boundary (the LLM client, seen from the core).
//!
//! Each call asks for the next batch of proposed operations or a terminal
//! "done" signal. `MockActionProvider` replays a script so the loop can be
//! exercised offline and in tests.

use crate::domain::OperationKind;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Context handed to the provider on each THINKING step.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// The task description for the whole run
    pub task: String,
    /// 1-based iteration number
    pub iteration: u32,
    /// Failure details from the previous iteration, if any
    pub feedback: Option<String>,
}

/// What the provider proposes next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NextAction {
    /// Operations to attempt this iteration
    Operations(Vec<OperationKind>),
    /// The task is complete
    Done { summary: String },
}

/// The language-model client, seen from the core.
#[async_trait]
pub trait ActionProvider: Send + Sync {
    async fn next_action(&self, context: &ActionContext) -> Result<NextAction>;
}

/// Scripted provider: pops one action per call; an exhausted script
/// signals completion.
pub struct MockActionProvider {
    script: Mutex<Vec<NextAction>>,
}

impl MockActionProvider {
    pub fn new(script: Vec<NextAction>) -> Self {
        Self {
            script: Mutex::new(script),
        }
    }

    /// A provider that signals completion immediately.
    pub fn done() -> Self {
        Self::new(vec![])
    }
}

#[async_trait]
impl ActionProvider for MockActionProvider {
    async fn next_action(&self, _context: &ActionContext) -> Result<NextAction> {
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            Ok(NextAction::Done {
                summary: "script exhausted".to_string(),
            })
        } else {
            Ok(script.remove(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn context() -> ActionContext {
        ActionContext {
            task: "test".to_string(),
            iteration: 1,
            feedback: None,
        }
    }

    #[tokio::test]
    async fn test_mock_replays_script_then_done() {
        let provider = MockActionProvider::new(vec![NextAction::Operations(vec![
            OperationKind::Read {
                path: PathBuf::from("a.txt"),
            },
        ])]);

        match provider.next_action(&context()).await.unwrap() {
            NextAction::Operations(ops) => assert_eq!(ops.len(), 1),
            other => panic!("expected operations, got {:?}", other),
        }
        // Script files round-trip through serde
        let json = serde_json::to_string(&NextAction::Done {
            summary: "ok".to_string(),
        })
        .unwrap();
        let restored: NextAction = serde_json::from_str(&json).unwrap();
        assert!(matches!(restored, NextAction::Done { .. }));
        assert!(matches!(
            provider.next_action(&context()).await.unwrap(),
            NextAction::Done { .. }
        ));
    }

    #[tokio::test]
    async fn test_done_provider() {
        let provider = MockActionProvider::done();
        assert!(matches!(
            provider.next_action(&context()).await.unwrap(),
            NextAction::Done { .. }
        ));
    }
}
