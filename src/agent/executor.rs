//! Operation execution.
//!
//! A typed registry maps each operation kind to a handler function,
//! resolved once at startup. Handlers apply the mutation (or read) against
//! the project root; path operands must stay inside it.

use crate::domain::OperationKind;
use crate::error::{Result, WardenError};
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

const MAX_OUTPUT_BYTES: usize = 100_000;

/// Execution context shared by all handlers.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Project root all paths resolve against
    pub root: PathBuf,
}

impl ExecContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a relative operand against the root, rejecting escapes.
    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            return Err(WardenError::Validation(format!(
                "absolute path not allowed: {}",
                path.display()
            )));
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(WardenError::Validation(format!(
                "path escapes project root: {}",
                path.display()
            )));
        }
        Ok(self.root.join(path))
    }
}

type Handler = fn(&ExecContext, &OperationKind) -> Result<String>;

/// Typed operation-kind -> handler registry, resolved at startup.
pub struct ExecutorRegistry {
    handlers: HashMap<&'static str, Handler>,
}

impl ExecutorRegistry {
    /// The standard handler set covering every operation kind.
    pub fn standard() -> Self {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        handlers.insert("read", handle_read);
        handlers.insert("list", handle_list);
        handlers.insert("write", handle_write);
        handlers.insert("append", handle_append);
        handlers.insert("delete", handle_delete);
        handlers.insert("exec", handle_exec);
        handlers.insert("vcs", handle_vcs);
        Self { handlers }
    }

    /// Execute an operation, returning its output.
    pub fn execute(&self, ctx: &ExecContext, kind: &OperationKind) -> Result<String> {
        let handler = self.handlers.get(kind.name()).ok_or_else(|| {
            WardenError::Validation(format!("no handler registered for kind {}", kind.name()))
        })?;
        handler(ctx, kind)
    }
}

fn handle_read(ctx: &ExecContext, kind: &OperationKind) -> Result<String> {
    let OperationKind::Read { path } = kind else {
        return Err(WardenError::Validation("read handler got wrong kind".into()));
    };
    let full = ctx.resolve(path)?;
    let content = fs::read_to_string(&full)?;
    Ok(truncate(content))
}

fn handle_list(ctx: &ExecContext, kind: &OperationKind) -> Result<String> {
    let OperationKind::List { path } = kind else {
        return Err(WardenError::Validation("list handler got wrong kind".into()));
    };
    let full = ctx.resolve(path)?;
    let mut names: Vec<String> = fs::read_dir(&full)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    Ok(names.join("\n"))
}

fn handle_write(ctx: &ExecContext, kind: &OperationKind) -> Result<String> {
    let OperationKind::Write { path, content } = kind else {
        return Err(WardenError::Validation("write handler got wrong kind".into()));
    };
    let full = ctx.resolve(path)?;
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&full, content)?;
    Ok(format!("wrote {} bytes to {}", content.len(), path.display()))
}

fn handle_append(ctx: &ExecContext, kind: &OperationKind) -> Result<String> {
    use std::io::Write;

    let OperationKind::Append { path, content } = kind else {
        return Err(WardenError::Validation("append handler got wrong kind".into()));
    };
    let full = ctx.resolve(path)?;
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new().create(true).append(true).open(&full)?;
    file.write_all(content.as_bytes())?;
    Ok(format!("appended {} bytes to {}", content.len(), path.display()))
}

fn handle_delete(ctx: &ExecContext, kind: &OperationKind) -> Result<String> {
    let OperationKind::Delete { path } = kind else {
        return Err(WardenError::Validation("delete handler got wrong kind".into()));
    };
    let full = ctx.resolve(path)?;
    if full.is_dir() {
        fs::remove_dir_all(&full)?;
    } else {
        fs::remove_file(&full)?;
    }
    Ok(format!("deleted {}", path.display()))
}

fn handle_exec(ctx: &ExecContext, kind: &OperationKind) -> Result<String> {
    let OperationKind::Exec { command } = kind else {
        return Err(WardenError::Validation("exec handler got wrong kind".into()));
    };
    let output = Command::new("bash")
        .arg("-c")
        .arg(command)
        .current_dir(&ctx.root)
        .output()
        .map_err(|e| WardenError::Task(format!("Failed to spawn bash: {}", e)))?;

    let merged = merge_output(&output.stdout, &output.stderr);
    if output.status.success() {
        Ok(merged)
    } else {
        Err(WardenError::Task(format!(
            "command exited with {}: {}",
            output.status.code().unwrap_or(-1),
            merged
        )))
    }
}

fn handle_vcs(ctx: &ExecContext, kind: &OperationKind) -> Result<String> {
    let OperationKind::Vcs { args } = kind else {
        return Err(WardenError::Validation("vcs handler got wrong kind".into()));
    };
    let output = Command::new("git")
        .args(args)
        .current_dir(&ctx.root)
        .output()
        .map_err(|e| WardenError::Git(format!("Failed to execute git: {}", e)))?;

    let merged = merge_output(&output.stdout, &output.stderr);
    if output.status.success() {
        Ok(merged)
    } else {
        Err(WardenError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            merged
        )))
    }
}

fn merge_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut merged = String::from_utf8_lossy(stdout).to_string();
    let err = String::from_utf8_lossy(stderr);
    if !err.is_empty() {
        if !merged.is_empty() {
            merged.push_str("\n--- stderr ---\n");
        }
        merged.push_str(&err);
    }
    truncate(merged)
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_OUTPUT_BYTES {
        text.truncate(MAX_OUTPUT_BYTES);
        text.push_str("\n... [output truncated]");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ExecContext, ExecutorRegistry) {
        let temp = TempDir::new().unwrap();
        let ctx = ExecContext::new(temp.path());
        (temp, ctx, ExecutorRegistry::standard())
    }

    #[test]
    fn test_write_then_read() {
        let (_temp, ctx, registry) = setup();

        let write = OperationKind::Write {
            path: PathBuf::from("notes/hello.txt"),
            content: "hello".to_string(),
        };
        let output = registry.execute(&ctx, &write).unwrap();
        assert!(output.contains("5 bytes"));

        let read = OperationKind::Read {
            path: PathBuf::from("notes/hello.txt"),
        };
        assert_eq!(registry.execute(&ctx, &read).unwrap(), "hello");
    }

    #[test]
    fn test_append_creates_and_extends() {
        let (_temp, ctx, registry) = setup();

        let append = OperationKind::Append {
            path: PathBuf::from("log.txt"),
            content: "one\n".to_string(),
        };
        registry.execute(&ctx, &append).unwrap();
        registry.execute(&ctx, &append).unwrap();

        let read = OperationKind::Read {
            path: PathBuf::from("log.txt"),
        };
        assert_eq!(registry.execute(&ctx, &read).unwrap(), "one\none\n");
    }

    #[test]
    fn test_list_sorted() {
        let (temp, ctx, registry) = setup();
        fs::write(temp.path().join("b.txt"), "").unwrap();
        fs::write(temp.path().join("a.txt"), "").unwrap();

        let list = OperationKind::List {
            path: PathBuf::from(""),
        };
        assert_eq!(registry.execute(&ctx, &list).unwrap(), "a.txt\nb.txt");
    }

    #[test]
    fn test_delete_file_and_dir() {
        let (temp, ctx, registry) = setup();
        fs::create_dir(temp.path().join("dir")).unwrap();
        fs::write(temp.path().join("dir/f.txt"), "x").unwrap();

        let delete = OperationKind::Delete {
            path: PathBuf::from("dir"),
        };
        registry.execute(&ctx, &delete).unwrap();
        assert!(!temp.path().join("dir").exists());
    }

    #[test]
    fn test_exec_success_and_failure() {
        let (_temp, ctx, registry) = setup();

        let ok = OperationKind::Exec {
            command: "echo hi".to_string(),
        };
        assert!(registry.execute(&ctx, &ok).unwrap().contains("hi"));

        let bad = OperationKind::Exec {
            command: "exit 3".to_string(),
        };
        let err = registry.execute(&ctx, &bad).unwrap_err();
        assert!(err.to_string().contains("exited with 3"));
    }

    #[test]
    fn test_path_escape_rejected() {
        let (_temp, ctx, registry) = setup();

        let escape = OperationKind::Read {
            path: PathBuf::from("../outside.txt"),
        };
        assert!(matches!(
            registry.execute(&ctx, &escape).unwrap_err(),
            WardenError::Validation(_)
        ));

        let absolute = OperationKind::Delete {
            path: PathBuf::from("/etc/passwd"),
        };
        assert!(matches!(
            registry.execute(&ctx, &absolute).unwrap_err(),
            WardenError::Validation(_)
        ));
    }

    #[test]
    fn test_vcs_in_repo() {
        let (temp, ctx, registry) = setup();
        for args in [
            vec!["init"],
            vec!["config", "user.email", "t@t.com"],
            vec!["config", "user.name", "T"],
        ] {
            Command::new("git")
                .args(&args)
                .current_dir(temp.path())
                .output()
                .unwrap();
        }

        let status = OperationKind::Vcs {
            args: vec!["status".to_string(), "--porcelain".to_string()],
        };
        assert!(registry.execute(&ctx, &status).is_ok());

        let bogus = OperationKind::Vcs {
            args: vec!["not-a-subcommand".to_string()],
        };
        assert!(registry.execute(&ctx, &bogus).is_err());
    }
}
