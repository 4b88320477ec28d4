//! Persistence for the singleton state, the audit logs, and principles.
//!
//! Layout under the state directory:
//! - `state.json`: the [`InternalState`] aggregate, written atomically
//! - `metrics.jsonl`: one [`CycleMetrics`] record per cycle, append-only
//! - `thoughts.jsonl`: one [`ThoughtRecord`] per thought, append-only
//! - `principles.json`: principle slots overwritten by self-modification
//! - `config.toml`: engine configuration (see [`crate::io::config`])

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use jsonschema::validator_for;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::core::types::{CycleMetrics, InternalState, ThoughtRecord};
use crate::io::reasoner::Principle;

const STATE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/internal_state/v1.schema.json"
));

/// Abstraction over the durable store the cycle reads from and writes to.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_state(&self) -> Result<InternalState>;

    async fn save_state(&self, state: &InternalState) -> Result<()>;

    async fn save_metrics(&self, metrics: &CycleMetrics) -> Result<()>;

    async fn save_thought(&self, thought: &ThoughtRecord) -> Result<()>;

    /// Overwrite a principle slot.
    async fn update_principle(&self, slot: u8, text: &str, rating: f64) -> Result<()>;
}

/// File-backed [`StateStore`] rooted at a state directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.root.join("metrics.jsonl")
    }

    pub fn thoughts_path(&self) -> PathBuf {
        self.root.join("thoughts.jsonl")
    }

    pub fn principles_path(&self) -> PathBuf {
        self.root.join("principles.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load_state(&self) -> Result<InternalState> {
        let path = self.state_path();
        blocking(move || load_state(&path)).await
    }

    async fn save_state(&self, state: &InternalState) -> Result<()> {
        let path = self.state_path();
        let state = state.clone();
        blocking(move || write_state(&path, &state)).await
    }

    async fn save_metrics(&self, metrics: &CycleMetrics) -> Result<()> {
        let path = self.metrics_path();
        let metrics = metrics.clone();
        blocking(move || append_jsonl(&path, &metrics)).await
    }

    async fn save_thought(&self, thought: &ThoughtRecord) -> Result<()> {
        let path = self.thoughts_path();
        let thought = thought.clone();
        blocking(move || append_jsonl(&path, &thought)).await
    }

    async fn update_principle(&self, slot: u8, text: &str, rating: f64) -> Result<()> {
        let path = self.principles_path();
        let principle = Principle {
            slot,
            text: text.to_string(),
            rating,
        };
        blocking(move || upsert_principle(&path, principle)).await
    }
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .context("state store task failed")?
}

/// Load state from disk, validating it against the state schema.
///
/// A missing file yields the empty state.
pub fn load_state(path: &Path) -> Result<InternalState> {
    debug!(path = %path.display(), "loading state");
    if !path.exists() {
        debug!(path = %path.display(), "state file missing; starting empty");
        return Ok(InternalState::default());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read state {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse state {}", path.display()))?;
    validate_schema(&value)?;
    let state: InternalState = serde_json::from_value(value)
        .with_context(|| format!("deserialize state {}", path.display()))?;
    debug!(
        cycle_count = state.cycle_count,
        active_goals = state.active_goals.len(),
        "state loaded"
    );
    Ok(state)
}

/// Atomically write state to disk (temp file + rename).
pub fn write_state(path: &Path, state: &InternalState) -> Result<()> {
    debug!(path = %path.display(), cycle_count = state.cycle_count, "writing state");
    let mut buf = serde_json::to_string_pretty(state).context("serialize state")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn validate_schema(state: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(STATE_SCHEMA).context("parse state schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(state) {
        let messages = compiled
            .iter_errors(state)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "state schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Append one JSON record as a line.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(record).context("serialize record")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}

/// Read every record of a JSONL file; a missing file is empty.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse {} line {}", path.display(), idx + 1))
        })
        .collect()
}

pub fn load_principles(path: &Path) -> Result<Vec<Principle>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn upsert_principle(path: &Path, principle: Principle) -> Result<()> {
    let mut principles = load_principles(path)?;
    match principles.iter_mut().find(|p| p.slot == principle.slot) {
        Some(existing) => *existing = principle,
        None => principles.push(principle),
    }
    principles.sort_by_key(|p| p.slot);
    let mut buf = serde_json::to_string_pretty(&principles).context("serialize principles")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
