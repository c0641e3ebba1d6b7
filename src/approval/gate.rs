//! Shadow levels and gate routing.
//!
//! The gate routes a classified operation one of three ways: execute now,
//! queue for human approval, or block outright. Level changes apply to
//! subsequent submissions only, never retroactively.

use crate::domain::RiskTier;
use crate::error::Result;
use crate::state::{load_json, save_json};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Global approval-gating policy level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShadowLevel {
    /// Classifier output ignored; everything auto-executes. For isolated
    /// sandboxes only.
    Disabled,
    /// Only HIGH tier operations are queued.
    #[default]
    Enabled,
    /// MEDIUM and HIGH are both queued.
    Strict,
}

impl std::fmt::Display for ShadowLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShadowLevel::Disabled => write!(f, "disabled"),
            ShadowLevel::Enabled => write!(f, "enabled"),
            ShadowLevel::Strict => write!(f, "strict"),
        }
    }
}

impl std::str::FromStr for ShadowLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" => Ok(ShadowLevel::Disabled),
            "enabled" => Ok(ShadowLevel::Enabled),
            "strict" => Ok(ShadowLevel::Strict),
            other => Err(format!("unknown shadow level: {}", other)),
        }
    }
}

/// How the gate routed an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Apply immediately
    Execute,
    /// Submit to the approval queue and wait
    Queue,
    /// Matched an always-block pattern; auto-reject
    Block,
}

/// Persisted gating policy (`shadow_config.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    pub level: ShadowLevel,
    pub auto_approve_patterns: Vec<String>,
    pub always_block_patterns: Vec<String>,
}

impl ShadowConfig {
    /// Load from disk, or defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(load_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(path, self)
    }

    /// Route a classified operation.
    ///
    /// Always-block patterns win over everything, including DISABLED;
    /// auto-approve patterns skip the queue for otherwise-queued targets.
    pub fn gate(&self, tier: RiskTier, target: &str) -> GateDecision {
        if matches_any(&self.always_block_patterns, target) {
            return GateDecision::Block;
        }

        let queued_by_level = match self.level {
            ShadowLevel::Disabled => false,
            ShadowLevel::Enabled => tier == RiskTier::High,
            ShadowLevel::Strict => tier >= RiskTier::Medium,
        };
        if !queued_by_level {
            return GateDecision::Execute;
        }

        if matches_any(&self.auto_approve_patterns, target) {
            return GateDecision::Execute;
        }
        GateDecision::Queue
    }
}

fn matches_any(patterns: &[String], target: &str) -> bool {
    patterns.iter().any(|raw| match glob::Pattern::new(raw) {
        Ok(pattern) => pattern.matches(target),
        Err(e) => {
            log::warn!("Ignoring invalid shadow pattern {:?}: {}", raw, e);
            false
        }
    })
}
