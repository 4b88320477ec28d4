//! Validation of a persisted state directory for `deliberation validate`.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::adaptive::AdaptiveConfig;
use crate::core::invariants::{validate_invariants, validate_thought_sequence};
use crate::core::types::ThoughtRecord;
use crate::io::config::load_config;
use crate::io::state_store::{FileStateStore, load_state, read_jsonl};

/// High-level validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub cycle_count: u64,
    /// Invariant violations; empty when the state is consistent.
    pub violations: Vec<String>,
}

impl ValidateOutcome {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Load config and state, then check the state invariants and the thought log.
///
/// Unreadable or schema-invalid files are errors; semantic problems are
/// reported as violations.
pub fn validate_state_dir(root: &Path, now: DateTime<Utc>) -> Result<ValidateOutcome> {
    if !root.is_dir() {
        return Err(anyhow!("missing state directory {}", root.display()));
    }
    let store = FileStateStore::new(root);
    let config = load_config(&store.config_path()).context("load config.toml")?;
    let state_path = store.state_path();
    if !state_path.is_file() {
        return Err(anyhow!("missing file {}", state_path.display()));
    }
    let state = load_state(&state_path).context("load state.json")?;

    let adaptive = AdaptiveConfig::new(config.adaptive);
    let mut violations = validate_invariants(&state, &adaptive, now);
    let thoughts: Vec<ThoughtRecord> =
        read_jsonl(&store.thoughts_path()).context("read thoughts.jsonl")?;
    violations.extend(validate_thought_sequence(&thoughts));
    debug!(
        cycle_count = state.cycle_count,
        violations = violations.len(),
        "state directory validated"
    );

    Ok(ValidateOutcome {
        cycle_count: state.cycle_count,
        violations,
    })
}
