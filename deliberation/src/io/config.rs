//! Engine configuration stored under `<state-dir>/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::adaptive::AdaptiveSettings;

/// Engine configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Wall-clock budget for one cycle.
    pub max_duration_minutes: u64,

    /// Soft cap on reasoner tokens per cycle.
    pub max_tokens_per_cycle: u32,

    pub max_thoughts_per_cycle: u32,

    /// Store reflection learnings as collective memories.
    pub store_insights: bool,

    /// Bounded wait after memory writes so the index can catch up.
    pub memory_index_wait_ms: u64,

    pub enable_secondary_goals: bool,

    pub adaptive: AdaptiveSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_duration_minutes: 10,
            max_tokens_per_cycle: 20_000,
            max_thoughts_per_cycle: 8,
            store_insights: true,
            memory_index_wait_ms: 500,
            enable_secondary_goals: true,
            adaptive: AdaptiveSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_duration_minutes == 0 {
            return Err(anyhow!("max_duration_minutes must be > 0"));
        }
        if self.max_tokens_per_cycle == 0 {
            return Err(anyhow!("max_tokens_per_cycle must be > 0"));
        }
        if self.max_thoughts_per_cycle == 0 {
            return Err(anyhow!("max_thoughts_per_cycle must be > 0"));
        }
        if self.adaptive.base_tool_timeout_secs == 0 {
            return Err(anyhow!("adaptive.base_tool_timeout_secs must be > 0"));
        }
        for (name, value) in [
            ("adaptive.base_search_threshold", self.adaptive.base_search_threshold),
            ("adaptive.base_goal_similarity", self.adaptive.base_goal_similarity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{name} must be within [0, 1], got {value}"));
            }
        }
        Ok(())
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_minutes * 60)
    }

    pub fn memory_index_wait(&self) -> Duration {
        Duration::from_millis(self.memory_index_wait_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
