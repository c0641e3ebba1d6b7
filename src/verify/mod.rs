//! Verification boundary.
//!
//! Concrete verification tools (linters, test runners, scanners) live
//! outside the core; the core only needs a pass/fail answer. The
//! `CommandVerifier` shells out to a configured command; `MockVerifier`
//! returns scripted results for tests and offline runs.

use crate::error::{Result, WardenError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// How much verification to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyLevel {
    /// Fast checks only
    Quick,
    /// The full suite
    Full,
}

/// Result of a verification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyReport {
    pub passed: bool,
    pub details: String,
}

impl VerifyReport {
    pub fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            details: details.into(),
        }
    }

    pub fn fail(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: details.into(),
        }
    }
}

/// External verification tools, seen from the core.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, level: VerifyLevel) -> Result<VerifyReport>;
}

/// Runs a shell command and reports pass/fail from its exit status.
pub struct CommandVerifier {
    quick_command: String,
    full_command: String,
    workdir: PathBuf,
    timeout: Duration,
    max_output_bytes: usize,
}

impl CommandVerifier {
    pub fn new(
        quick_command: impl Into<String>,
        full_command: impl Into<String>,
        workdir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            quick_command: quick_command.into(),
            full_command: full_command.into(),
            workdir: workdir.into(),
            timeout,
            max_output_bytes: 100_000,
        }
    }

    async fn run(&self, command: &str) -> Result<VerifyReport> {
        let mut child = Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| WardenError::Task(format!("Failed to spawn bash: {}", e)))?;

        let result = tokio::time::timeout(self.timeout, async {
            let status = child.wait().await?;
            let mut stdout = String::new();
            let mut stderr = String::new();

            if let Some(mut out) = child.stdout.take() {
                out.read_to_string(&mut stdout).await?;
            }
            if let Some(mut err) = child.stderr.take() {
                err.read_to_string(&mut stderr).await?;
            }

            Ok::<_, std::io::Error>((status, stdout, stderr))
        })
        .await;

        match result {
            Ok(Ok((status, stdout, stderr))) => {
                let mut output = stdout;
                if !stderr.is_empty() {
                    if !output.is_empty() {
                        output.push_str("\n--- stderr ---\n");
                    }
                    output.push_str(&stderr);
                }
                if output.len() > self.max_output_bytes {
                    output.truncate(self.max_output_bytes);
                    output.push_str("\n... [output truncated]");
                }

                if status.success() {
                    Ok(VerifyReport::pass(output))
                } else {
                    Ok(VerifyReport::fail(output))
                }
            }
            Ok(Err(e)) => Err(WardenError::Task(format!("IO error: {}", e))),
            Err(_) => {
                let _ = child.kill().await;
                Ok(VerifyReport::fail(format!(
                    "verification timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

#[async_trait]
impl Verifier for CommandVerifier {
    async fn verify(&self, level: VerifyLevel) -> Result<VerifyReport> {
        let command = match level {
            VerifyLevel::Quick => &self.quick_command,
            VerifyLevel::Full => &self.full_command,
        };
        log::debug!("Running verification ({:?}): {}", level, command);
        self.run(command).await
    }
}

/// Scripted verifier: pops one report per call, repeating the last.
pub struct MockVerifier {
    reports: Mutex<Vec<VerifyReport>>,
}

impl MockVerifier {
    pub fn new(reports: Vec<VerifyReport>) -> Self {
        Self {
            reports: Mutex::new(reports),
        }
    }

    /// A verifier that always passes.
    pub fn passing() -> Self {
        Self::new(vec![VerifyReport::pass("ok")])
    }

    /// A verifier that always fails.
    pub fn failing(details: &str) -> Self {
        Self::new(vec![VerifyReport::fail(details)])
    }
}

#[async_trait]
impl Verifier for MockVerifier {
    async fn verify(&self, _level: VerifyLevel) -> Result<VerifyReport> {
        let mut reports = self.reports.lock().unwrap();
        if reports.len() > 1 {
            Ok(reports.remove(0))
        } else {
            reports
                .first()
                .cloned()
                .ok_or_else(|| WardenError::Task("mock verifier has no reports".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_command_verifier_pass() {
        let temp = TempDir::new().unwrap();
        let verifier = CommandVerifier::new(
            "true",
            "true",
            temp.path(),
            Duration::from_secs(5),
        );
        let report = verifier.verify(VerifyLevel::Quick).await.unwrap();
        assert!(report.passed);
    }

    #[tokio::test]
    async fn test_command_verifier_fail_captures_output() {
        let temp = TempDir::new().unwrap();
        let verifier = CommandVerifier::new(
            "echo boom && exit 1",
            "true",
            temp.path(),
            Duration::from_secs(5),
        );
        let report = verifier.verify(VerifyLevel::Quick).await.unwrap();
        assert!(!report.passed);
        assert!(report.details.contains("boom"));
    }

    #[tokio::test]
    async fn test_command_verifier_level_selects_command() {
        let temp = TempDir::new().unwrap();
        let verifier = CommandVerifier::new(
            "exit 1",
            "true",
            temp.path(),
            Duration::from_secs(5),
        );
        assert!(!verifier.verify(VerifyLevel::Quick).await.unwrap().passed);
        assert!(verifier.verify(VerifyLevel::Full).await.unwrap().passed);
    }

    #[tokio::test]
    async fn test_command_verifier_timeout_fails() {
        let temp = TempDir::new().unwrap();
        let verifier = CommandVerifier::new(
            "sleep 5",
            "true",
            temp.path(),
            Duration::from_millis(100),
        );
        let report = verifier.verify(VerifyLevel::Quick).await.unwrap();
        assert!(!report.passed);
        assert!(report.details.contains("timed out"));
    }

    #[tokio::test]
    async fn test_mock_verifier_sequence() {
        let verifier = MockVerifier::new(vec![
            VerifyReport::fail("first run red"),
            VerifyReport::pass("second run green"),
        ]);
        assert!(!verifier.verify(VerifyLevel::Quick).await.unwrap().passed);
        assert!(verifier.verify(VerifyLevel::Quick).await.unwrap().passed);
        // Last report repeats
        assert!(verifier.verify(VerifyLevel::Quick).await.unwrap().passed);
    }
}
