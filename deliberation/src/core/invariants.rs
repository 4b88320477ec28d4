//! Semantic invariants that must hold after every cycle.
//!
//! Checks return human-readable violations instead of failing fast so the CLI
//! can report every problem at once.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::core::adaptive::AdaptiveConfig;
use crate::core::goals::is_locked;
use crate::core::limits::{
    MAX_ACTIVE_GOALS, MISSION_DROP_THRESHOLD, MISSION_QUEUE_CAP, REPLAN_CAP,
    SEARCH_LAST_PROGRESS_CAP,
};
use crate::core::types::{ActionStatus, InternalState, MissionStatus, ThoughtRecord, Tool};

/// Check the persisted-state invariants:
/// - unique goal ids, priorities in 1..=10, progress in [0, 1]
/// - at most one in-progress action per active goal, none older than its stale timeout
/// - active goals within the cap unless locked goals overflow it
/// - queued missions within the cap, priorities in (0.1, 1.0]
/// - search-then-pending-parse goals below the progress cap
/// - replan counts within the cap
pub fn validate_invariants(
    state: &InternalState,
    adaptive: &AdaptiveConfig,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut errors = Vec::new();
    validate_goals(state, adaptive, now, &mut errors);
    validate_missions(state, &mut errors);
    errors
}

fn validate_goals(
    state: &InternalState,
    adaptive: &AdaptiveConfig,
    now: DateTime<Utc>,
    errors: &mut Vec<String>,
) {
    let mut seen = HashSet::new();
    for goal in state.active_goals.iter().chain(state.completed_goals.iter()) {
        if !seen.insert(goal.id.as_str()) {
            errors.push(format!("duplicate goal id '{}'", goal.id));
        }
        if !(1..=10).contains(&goal.priority) {
            errors.push(format!("{}: priority {} outside 1-10", goal.id, goal.priority));
        }
        if !(0.0..=1.0).contains(&goal.progress) {
            errors.push(format!("{}: progress {} outside [0, 1]", goal.id, goal.progress));
        }
        if goal.replan_count > REPLAN_CAP {
            errors.push(format!(
                "{}: replan_count {} exceeds {}",
                goal.id, goal.replan_count, REPLAN_CAP
            ));
        }
    }

    let mut locked = 0;
    for goal in &state.active_goals {
        if !goal.is_active() {
            errors.push(format!("{}: finished goal left in active list", goal.id));
        }
        if is_locked(goal) {
            locked += 1;
        }

        let in_progress: Vec<_> = goal
            .actions
            .iter()
            .filter(|action| action.status == ActionStatus::InProgress)
            .collect();
        if in_progress.len() > 1 {
            errors.push(format!(
                "{}: {} actions in progress",
                goal.id,
                in_progress.len()
            ));
        }
        for action in in_progress {
            let timeout = adaptive.stale_timeout(action.tool);
            if now - action.timestamp > timeout {
                errors.push(format!(
                    "{}: in-progress {} action older than {}s",
                    goal.id,
                    action.tool.as_str(),
                    timeout.num_seconds()
                ));
            }
        }

        let last_completed = goal
            .actions
            .iter()
            .rev()
            .find(|action| action.status == ActionStatus::Completed);
        let parse_pending = goal.actions.iter().any(|action| {
            action.tool == Tool::WebParseUnified && action.status != ActionStatus::Completed
        });
        if last_completed.is_some_and(|action| action.tool == Tool::Search)
            && parse_pending
            && goal.progress > SEARCH_LAST_PROGRESS_CAP
        {
            errors.push(format!(
                "{}: progress {} exceeds {} while a parse is pending",
                goal.id, goal.progress, SEARCH_LAST_PROGRESS_CAP
            ));
        }
    }

    let cap = MAX_ACTIVE_GOALS.max(locked);
    if state.active_goals.len() > cap {
        errors.push(format!(
            "{} active goals exceed cap {} ({} locked)",
            state.active_goals.len(),
            cap,
            locked
        ));
    }
}

fn validate_missions(state: &InternalState, errors: &mut Vec<String>) {
    let queue = &state.missions;
    if queue.queued_missions.len() > MISSION_QUEUE_CAP {
        errors.push(format!(
            "{} queued missions exceed cap {}",
            queue.queued_missions.len(),
            MISSION_QUEUE_CAP
        ));
    }
    for mission in &queue.queued_missions {
        if mission.priority <= MISSION_DROP_THRESHOLD || mission.priority > 1.0 {
            errors.push(format!(
                "{}: priority {} outside ({}, 1.0]",
                mission.id, mission.priority, MISSION_DROP_THRESHOLD
            ));
        }
        if mission.status != MissionStatus::Queued {
            errors.push(format!("{}: queued mission has status {:?}", mission.id, mission.status));
        }
    }
    if let Some(active) = &queue.active_mission {
        if active.status != MissionStatus::Active {
            errors.push(format!("{}: active mission has status {:?}", active.id, active.status));
        }
        if queue.queued_missions.iter().any(|queued| queued.id == active.id) {
            errors.push(format!("{}: active mission is also queued", active.id));
        }
    }
}

/// Thought numbers must strictly increase within each cycle.
pub fn validate_thought_sequence(records: &[ThoughtRecord]) -> Vec<String> {
    let mut errors = Vec::new();
    for pair in records.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if prev.cycle_id == next.cycle_id && next.thought_num <= prev.thought_num {
            errors.push(format!(
                "cycle {}: thought {} follows {}",
                next.cycle_id, next.thought_num, prev.thought_num
            ));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mission_queue::MissionQueue;
    use crate::core::types::{Action, Goal, GoalSource, Mission, MissionSource};
    use chrono::{Duration, TimeZone};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap()
    }

    fn goal(id: &str) -> Goal {
        let mut goal = Goal::new(id, GoalSource::Reflection, 5, at());
        goal.id = id.to_string();
        goal
    }

    #[test]
    fn empty_state_is_valid() {
        let errors = validate_invariants(&InternalState::default(), &AdaptiveConfig::default(), at());
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn reports_goal_violations() {
        let mut state = InternalState::default();
        let mut busy = goal("busy");
        for _ in 0..2 {
            let mut action = Action::pending(Tool::Search, "q", at() - Duration::hours(3));
            action.status = ActionStatus::InProgress;
            busy.actions.push(action);
        }
        busy.replan_count = 4;
        state.active_goals.push(busy);
        state.active_goals.push(goal("busy"));

        let errors = validate_invariants(&state, &AdaptiveConfig::default(), at());
        assert!(errors.iter().any(|e| e.contains("duplicate goal id")));
        assert!(errors.iter().any(|e| e.contains("2 actions in progress")));
        assert!(errors.iter().any(|e| e.contains("older than")));
        assert!(errors.iter().any(|e| e.contains("replan_count 4")));
    }

    #[test]
    fn reports_search_progress_cap_violation() {
        let mut state = InternalState::default();
        let mut g = goal("g");
        let mut search = Action::pending(Tool::Search, "q", at());
        search.status = ActionStatus::Completed;
        g.actions.push(search);
        g.actions
            .push(Action::pending(Tool::WebParseUnified, "https://x.example", at()));
        g.progress = 1.0;
        state.active_goals.push(g);

        let errors = validate_invariants(&state, &AdaptiveConfig::default(), at());
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("parse is pending"));
    }

    #[test]
    fn reports_mission_violations() {
        let mut queue = MissionQueue::default();
        for idx in 0..6 {
            queue
                .queued_missions
                .push(Mission::new(format!("m{idx}"), MissionSource::Ai, 0.5, at()));
        }
        queue.queued_missions[0].priority = 0.05;
        let state = InternalState {
            missions: queue,
            ..InternalState::default()
        };

        let errors = validate_invariants(&state, &AdaptiveConfig::default(), at());
        assert!(errors.iter().any(|e| e.contains("6 queued missions")));
        assert!(errors.iter().any(|e| e.contains("priority 0.05")));
    }

    #[test]
    fn thought_numbers_must_increase_per_cycle() {
        let record = |cycle_id, thought_num| ThoughtRecord {
            cycle_id,
            thought_num,
            content: String::new(),
            tokens_used: 0,
            action_taken: false,
            timestamp: at(),
        };
        let ok = vec![record(1, 1), record(1, 2), record(2, 1)];
        assert!(validate_thought_sequence(&ok).is_empty());
        let bad = vec![record(1, 2), record(1, 2)];
        assert_eq!(validate_thought_sequence(&bad).len(), 1);
    }
}
