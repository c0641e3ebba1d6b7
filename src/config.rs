//! Configuration for warden
//!
//! Loaded from .warden.yml in the project, ~/.config/warden/warden.yml, or
//! defaults. Every threshold the safety core consults lives here; there is
//! no hidden state.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Risk classifier thresholds and pattern lists.
    pub risk: RiskSection,

    /// Approval wait behavior.
    pub approval: ApprovalSection,

    /// Circuit breaker thresholds.
    pub breaker: BreakerSection,

    /// Background task runner settings.
    pub tasks: TasksSection,

    /// Agent loop budgets.
    #[serde(rename = "loop")]
    pub agent_loop: LoopSection,

    /// Verification commands.
    pub verify: VerifySection,
}

impl WardenConfig {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .warden.yml in current directory
    /// 3. ~/.config/warden/warden.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(".warden.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from .warden.yml");
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load .warden.yml: {}", e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("warden").join("warden.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.tasks.pool_size == 0 {
            eyre::bail!("tasks.pool_size must be > 0");
        }
        if self.breaker.failure_threshold == 0 {
            eyre::bail!("breaker.failure_threshold must be > 0");
        }
        if self.agent_loop.max_iterations == 0 {
            eyre::bail!("loop.max_iterations must be > 0");
        }
        if !(0.0..=1.0).contains(&self.risk.rewrite_fraction) {
            eyre::bail!("risk.rewrite_fraction must be between 0 and 1");
        }
        Ok(())
    }
}

/// Risk classifier settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RiskSection {
    /// Writes/appends at or below this many bytes classify MEDIUM.
    #[serde(rename = "small-write-limit")]
    pub small_write_limit: u64,

    /// Overwrites changing more than this fraction of an existing file
    /// classify HIGH.
    #[serde(rename = "rewrite-fraction")]
    pub rewrite_fraction: f64,

    /// Glob patterns for paths that must never be touched without approval.
    #[serde(rename = "protected-paths")]
    pub protected_paths: Vec<String>,
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            small_write_limit: 1024,
            rewrite_fraction: 0.5,
            protected_paths: vec![
                "**/.env*".to_string(),
                "**/*secret*".to_string(),
                "**/*credentials*".to_string(),
                "**/id_rsa*".to_string(),
                ".github/**".to_string(),
            ],
        }
    }
}

/// Approval wait settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApprovalSection {
    /// How long to wait for a human decision before auto-rejecting.
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Poll interval while waiting.
    #[serde(rename = "poll-ms")]
    pub poll_ms: u64,
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            poll_ms: 250,
        }
    }
}

impl ApprovalSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerSection {
    /// Consecutive failures before CLOSED -> OPEN.
    #[serde(rename = "failure-threshold")]
    pub failure_threshold: u32,

    /// Cooldown before OPEN -> HALF_OPEN.
    #[serde(rename = "cooldown-secs")]
    pub cooldown_secs: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 60,
        }
    }
}

/// Task runner settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TasksSection {
    /// Worker pool size.
    #[serde(rename = "pool-size")]
    pub pool_size: usize,

    /// Per-task timeout in seconds.
    #[serde(rename = "task-timeout-secs")]
    pub task_timeout_secs: u64,
}

impl Default for TasksSection {
    fn default() -> Self {
        Self {
            pool_size: 4,
            task_timeout_secs: 600,
        }
    }
}

/// Agent loop budgets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoopSection {
    /// Iteration cap for one run.
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,

    /// Global wall-clock budget in seconds.
    #[serde(rename = "max-wall-clock-secs")]
    pub max_wall_clock_secs: u64,

    /// Timeout for a single provider call in seconds.
    #[serde(rename = "provider-timeout-secs")]
    pub provider_timeout_secs: u64,
}

impl Default for LoopSection {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            max_wall_clock_secs: 3600,
            provider_timeout_secs: 300,
        }
    }
}

impl LoopSection {
    pub fn max_wall_clock(&self) -> Duration {
        Duration::from_secs(self.max_wall_clock_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

/// Verification commands run by the task runner.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VerifySection {
    /// Fast checks (quick verification level).
    #[serde(rename = "quick-command")]
    pub quick_command: String,

    /// The full suite (full verification level).
    #[serde(rename = "full-command")]
    pub full_command: String,
}

impl Default for VerifySection {
    fn default() -> Self {
        Self {
            quick_command: "true".to_string(),
            full_command: "true".to_string(),
        }
    }
}
