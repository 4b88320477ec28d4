//! Mission queue commands run against a persisted state directory.

use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::core::mission_queue::{DecayReport, EnqueueOutcome};
use crate::core::types::{Mission, MissionSource};
use crate::io::state_store::{FileStateStore, load_state, write_state};

/// Result of `deliberation mission add`.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionAdded {
    pub outcome: EnqueueOutcome,
    /// Id of the mission promoted to active, when nothing was active before.
    pub promoted: Option<String>,
}

/// Enqueue a mission and promote the queue head if no mission is active.
pub fn add_mission(
    root: &Path,
    description: &str,
    source: MissionSource,
    priority: f64,
    now: DateTime<Utc>,
) -> Result<MissionAdded> {
    let description = description.trim();
    if description.is_empty() {
        bail!("mission description is empty");
    }
    if !(0.0..=1.0).contains(&priority) {
        bail!("mission priority {priority} outside [0, 1]");
    }

    let store = FileStateStore::new(root);
    let path = store.state_path();
    let mut state = load_state(&path).context("load state for mission add")?;
    let outcome = state
        .missions
        .enqueue(Mission::new(description, source, priority, now), now);
    let promoted = state
        .missions
        .promote_active(now)
        .map(|mission| mission.id.clone());
    write_state(&path, &state).context("save state after mission add")?;

    info!(outcome = ?outcome, promoted = ?promoted, "mission added");
    Ok(MissionAdded { outcome, promoted })
}

/// Apply mission decay as of `now`.
pub fn decay_missions(root: &Path, now: DateTime<Utc>) -> Result<DecayReport> {
    let store = FileStateStore::new(root);
    let path = store.state_path();
    let mut state = load_state(&path).context("load state for mission decay")?;
    let report = state.missions.decay(now);
    write_state(&path, &state).context("save state after mission decay")?;
    info!(
        decayed = report.decayed.len(),
        dropped = report.dropped.len(),
        "missions decayed"
    );
    Ok(report)
}
