//! Read-only summary of a state directory for `deliberation status`.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::goals::is_locked;
use crate::core::types::{GoalTier, InternalState, Mission, MissionSource};
use crate::io::state_store::{FileStateStore, load_state};

#[derive(Debug, Clone, PartialEq)]
pub struct MissionLine {
    pub id: String,
    pub description: String,
    pub source: MissionSource,
    pub priority: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoalLine {
    pub id: String,
    pub description: String,
    pub tier: GoalTier,
    pub priority: u8,
    pub progress: f64,
    pub locked: bool,
}

/// Snapshot of where the engine stands.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub cycle_count: u64,
    pub active_mission: Option<MissionLine>,
    pub queued_missions: Vec<MissionLine>,
    pub active_goals: Vec<GoalLine>,
    pub completed_goals: usize,
}

pub fn status_report(state: &InternalState) -> StatusReport {
    let mission_line = |mission: &Mission| MissionLine {
        id: mission.id.clone(),
        description: mission.description.clone(),
        source: mission.source,
        priority: mission.priority,
    };
    StatusReport {
        cycle_count: state.cycle_count,
        active_mission: state.missions.active_mission.as_ref().map(mission_line),
        queued_missions: state.missions.queued_missions.iter().map(mission_line).collect(),
        active_goals: state
            .active_goals
            .iter()
            .map(|goal| GoalLine {
                id: goal.id.clone(),
                description: goal.description.clone(),
                tier: goal.tier,
                priority: goal.priority,
                progress: goal.progress,
                locked: is_locked(goal),
            })
            .collect(),
        completed_goals: state.completed_goals.len(),
    }
}

pub fn status_from_root(root: &Path) -> Result<StatusReport> {
    let store = FileStateStore::new(root);
    let state = load_state(&store.state_path()).context("load state for status")?;
    Ok(status_report(&state))
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cycles: {}", self.cycle_count)?;
        match &self.active_mission {
            Some(mission) => writeln!(
                f,
                "active mission: {} [{:?} {:.2}] {}",
                mission.id, mission.source, mission.priority, mission.description
            )?,
            None => writeln!(f, "active mission: none")?,
        }
        writeln!(f, "queued missions: {}", self.queued_missions.len())?;
        for mission in &self.queued_missions {
            writeln!(
                f,
                "  {} [{:?} {:.2}] {}",
                mission.id, mission.source, mission.priority, mission.description
            )?;
        }
        writeln!(
            f,
            "active goals: {} (completed: {})",
            self.active_goals.len(),
            self.completed_goals
        )?;
        for goal in &self.active_goals {
            let tier = if goal.locked { "locked" } else { "queued" };
            writeln!(
                f,
                "  {} [{:?}/{} p{} {:.0}%] {}",
                goal.id,
                goal.tier,
                tier,
                goal.priority,
                goal.progress * 100.0,
                goal.description
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Goal, GoalSource};
    use chrono::Utc;

    #[test]
    fn report_marks_locked_goals() {
        let now = Utc::now();
        let mut state = InternalState {
            cycle_count: 7,
            ..InternalState::default()
        };
        state
            .missions
            .enqueue(Mission::new("Map the crate ecosystem", MissionSource::User, 0.6, now), now);
        let mut started = Goal::new("Study async traits", GoalSource::User, 8, now);
        started.last_pursued = Some(now);
        state.active_goals.push(started);
        state
            .active_goals
            .push(Goal::new("Skim release notes", GoalSource::Reflection, 3, now));

        let report = status_report(&state);

        assert_eq!(report.cycle_count, 7);
        assert_eq!(report.queued_missions.len(), 1);
        assert!(report.active_mission.is_none());
        let locked: Vec<bool> = report.active_goals.iter().map(|goal| goal.locked).collect();
        assert_eq!(locked, vec![true, false]);

        let rendered = report.to_string();
        assert!(rendered.contains("cycles: 7"));
        assert!(rendered.contains("locked"));
        assert!(rendered.contains("Map the crate ecosystem"));
    }
}
