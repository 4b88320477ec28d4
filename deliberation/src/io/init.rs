//! Scaffolding for a fresh state directory.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::config::{EngineConfig, write_config};
use super::state_store::{FileStateStore, write_state};
use crate::core::types::InternalState;

/// Options for [`init_state_dir`].
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Overwrite an existing config and state.
    pub force: bool,
}

/// Files `init_state_dir` wrote (existing files it left alone are omitted).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    pub wrote_config: bool,
    pub wrote_state: bool,
}

/// Create the state directory with a default `config.toml` and an empty state.
pub fn init_state_dir(root: &Path, options: &InitOptions) -> Result<InitReport> {
    let store = FileStateStore::new(root);
    fs::create_dir_all(root).with_context(|| format!("create {}", root.display()))?;

    let mut report = InitReport::default();
    let config_path = store.config_path();
    if options.force || !config_path.exists() {
        write_config(&config_path, &EngineConfig::default())
            .with_context(|| format!("write {}", config_path.display()))?;
        report.wrote_config = true;
    } else {
        debug!(path = %config_path.display(), "config exists; keeping");
    }

    let state_path = store.state_path();
    if options.force || !state_path.exists() {
        write_state(&state_path, &InternalState::default())
            .with_context(|| format!("write {}", state_path.display()))?;
        report.wrote_state = true;
    } else {
        debug!(path = %state_path.display(), "state exists; keeping");
    }

    info!(root = %root.display(), ?report, "state directory initialized");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;
    use crate::io::state_store::load_state;

    #[test]
    fn init_writes_defaults_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join(".deliberation");

        let first = init_state_dir(&root, &InitOptions::default()).expect("init");
        assert!(first.wrote_config && first.wrote_state);

        let store = FileStateStore::new(&root);
        assert_eq!(load_config(&store.config_path()).expect("config"), EngineConfig::default());
        assert_eq!(load_state(&store.state_path()).expect("state"), InternalState::default());

        let second = init_state_dir(&root, &InitOptions::default()).expect("init again");
        assert_eq!(second, InitReport::default());
    }

    /// Verifies `--force` resets a state that already has cycles recorded.
    #[test]
    fn force_overwrites_existing_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let store = FileStateStore::new(root);
        let state = InternalState {
            cycle_count: 4,
            ..InternalState::default()
        };
        write_state(&store.state_path(), &state).expect("seed state");

        let report = init_state_dir(root, &InitOptions { force: true }).expect("init");

        assert!(report.wrote_state);
        assert_eq!(load_state(&store.state_path()).expect("state").cycle_count, 0);
    }
}
