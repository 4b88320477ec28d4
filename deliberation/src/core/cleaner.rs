//! Stale-action preflight and end-of-cycle goal cleanup.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::core::adaptive::AdaptiveConfig;
use crate::core::goals::is_locked;
use crate::core::limits::{
    FAILED_GOAL_MAX_PROGRESS, FAILED_GOAL_MIN_ACTIONS, FAILED_GOAL_MIN_FAILED_ACTIONS,
    MAX_ACTIVE_GOALS, RECENT_FAILURES_CAP, STALE_NO_PROGRESS_HOURS, STALE_PARTIAL_PROGRESS_DAYS,
};
use crate::core::outcome::is_failure_result;
use crate::core::types::{ActionStatus, Goal, GoalStatus, InternalState, Outcome, Tool};

/// An in-progress action the preflight timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleAction {
    pub goal_id: String,
    pub tool: Tool,
    pub age: Duration,
    pub timeout: Duration,
}

/// Complete every in-progress action older than its stale timeout.
///
/// The action records a `TIMEOUT:` result and its goal's outcome becomes bad.
pub fn time_out_stale_actions(
    state: &mut InternalState,
    adaptive: &AdaptiveConfig,
    now: DateTime<Utc>,
) -> Vec<StaleAction> {
    let mut stale = Vec::new();
    for goal in &mut state.active_goals {
        let mut timed_out = false;
        for action in &mut goal.actions {
            if action.status != ActionStatus::InProgress {
                continue;
            }
            let age = now - action.timestamp;
            let timeout = adaptive.stale_timeout(action.tool);
            if age <= timeout {
                continue;
            }
            action.status = ActionStatus::Completed;
            action.result = format!(
                "TIMEOUT: Action abandoned after {} (timeout {})",
                format_duration(age),
                format_duration(timeout)
            );
            timed_out = true;
            warn!(
                goal_id = %goal.id,
                tool = action.tool.as_str(),
                age_secs = age.num_seconds(),
                timeout_secs = timeout.num_seconds(),
                "timed out stale action"
            );
            stale.push(StaleAction {
                goal_id: goal.id.clone(),
                tool: action.tool,
                age,
                timeout,
            });
        }
        if timed_out {
            goal.outcome = Some(Outcome::Bad);
        }
    }
    stale
}

/// Why cleanup abandoned a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    NoProgress,
    StalePartialProgress,
    RepeatedFailures,
    OverCapacity,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub abandoned: Vec<(String, AbandonReason)>,
    /// Ids moved from the active to the completed list.
    pub archived: Vec<String>,
    /// Archived goals whose status is `completed`.
    pub completed_count: u32,
    /// Locked goals beyond the active cap (kept regardless).
    pub locked_overflow: usize,
}

/// End-of-cycle cleanup of the active goal list.
pub fn cleanup(state: &mut InternalState, now: DateTime<Utc>) -> CleanupReport {
    let mut report = CleanupReport::default();

    archive_finished(state, &mut report);

    for goal in &mut state.active_goals {
        if let Some(reason) = stale_or_failed(goal, now) {
            let outcome = match reason {
                AbandonReason::RepeatedFailures => Outcome::Bad,
                _ => Outcome::Neutral,
            };
            goal.finish(GoalStatus::Abandoned, outcome);
            report.abandoned.push((goal.id.clone(), reason));
        }
    }

    enforce_capacity(&mut state.active_goals, &mut report);

    archive_finished(state, &mut report);
    debug!(
        archived = report.archived.len(),
        abandoned = report.abandoned.len(),
        active = state.active_goals.len(),
        "cleanup finished"
    );
    report
}

fn stale_or_failed(goal: &Goal, now: DateTime<Utc>) -> Option<AbandonReason> {
    let age = now - goal.created;
    if goal.progress == 0.0 && age > Duration::hours(STALE_NO_PROGRESS_HOURS) {
        return Some(AbandonReason::NoProgress);
    }
    if goal.progress > 0.0
        && goal.progress < 1.0
        && age > Duration::days(STALE_PARTIAL_PROGRESS_DAYS)
    {
        return Some(AbandonReason::StalePartialProgress);
    }
    let failed_actions = goal
        .actions
        .iter()
        .filter(|action| {
            action.status == ActionStatus::Completed && is_failure_result(&action.result)
        })
        .count();
    if goal.actions.len() > FAILED_GOAL_MIN_ACTIONS
        && goal.progress < FAILED_GOAL_MAX_PROGRESS
        && failed_actions >= FAILED_GOAL_MIN_FAILED_ACTIONS
    {
        return Some(AbandonReason::RepeatedFailures);
    }
    None
}

/// Keep every locked goal and fill the remaining slots with the
/// highest-priority queued goals; abandon the rest as neutral.
fn enforce_capacity(goals: &mut [Goal], report: &mut CleanupReport) {
    let locked = goals
        .iter()
        .filter(|goal| goal.is_active() && is_locked(goal))
        .count();
    if locked > MAX_ACTIVE_GOALS {
        report.locked_overflow = locked - MAX_ACTIVE_GOALS;
        warn!(locked, cap = MAX_ACTIVE_GOALS, "locked goals exceed active cap; keeping all");
    }
    let remaining = MAX_ACTIVE_GOALS.saturating_sub(locked);

    let mut queued: Vec<usize> = goals
        .iter()
        .enumerate()
        .filter(|(_, goal)| goal.is_active() && !is_locked(goal))
        .map(|(idx, _)| idx)
        .collect();
    queued.sort_by(|&left, &right| {
        goals[right]
            .priority
            .cmp(&goals[left].priority)
            .then_with(|| goals[left].created.cmp(&goals[right].created))
    });

    for &idx in queued.iter().skip(remaining) {
        let goal = &mut goals[idx];
        goal.finish(GoalStatus::Abandoned, Outcome::Neutral);
        report
            .abandoned
            .push((goal.id.clone(), AbandonReason::OverCapacity));
    }
}

/// Move finished goals to history; bad outcomes feed `recent_failures`.
fn archive_finished(state: &mut InternalState, report: &mut CleanupReport) {
    let (finished, active): (Vec<Goal>, Vec<Goal>) = std::mem::take(&mut state.active_goals)
        .into_iter()
        .partition(|goal| !goal.is_active());
    state.active_goals = active;

    for goal in finished {
        if goal.status == GoalStatus::Completed {
            report.completed_count += 1;
        }
        if goal.outcome == Some(Outcome::Bad) {
            state.recent_failures.push(goal.description.clone());
        }
        report.archived.push(goal.id.clone());
        state.completed_goals.push(goal);
    }

    let overflow = state
        .recent_failures
        .len()
        .saturating_sub(RECENT_FAILURES_CAP);
    state.recent_failures.drain(..overflow);
}

/// Render a duration as `1h2m3s`, dropping leading zero units.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::adaptive::AdaptiveSettings;
    use crate::core::types::{Action, GoalSource};
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap()
    }

    fn goal(id: &str, priority: u8) -> Goal {
        let mut goal = Goal::new(format!("goal {id}"), GoalSource::Reflection, priority, at());
        goal.id = id.to_string();
        goal
    }

    fn in_progress(tool: Tool, started: DateTime<Utc>) -> Action {
        let mut action = Action::pending(tool, "work", started);
        action.status = ActionStatus::InProgress;
        action
    }

    fn adaptive_with_timeout(secs: u64) -> AdaptiveConfig {
        let mut adaptive = AdaptiveConfig::new(AdaptiveSettings::default());
        adaptive.tool_timeout_secs = secs;
        adaptive
    }

    #[test]
    fn stale_search_is_timed_out_and_goal_marked_bad() {
        let mut state = InternalState::default();
        let mut g = goal("g", 5);
        g.actions
            .push(in_progress(Tool::Search, at() - Duration::minutes(20)));
        state.active_goals.push(g);

        let stale = time_out_stale_actions(&mut state, &adaptive_with_timeout(600), at());
        assert_eq!(stale.len(), 1);
        let g = &state.active_goals[0];
        assert_eq!(g.actions[0].status, ActionStatus::Completed);
        assert_eq!(
            g.actions[0].result,
            "TIMEOUT: Action abandoned after 20m0s (timeout 10m0s)"
        );
        assert_eq!(g.outcome, Some(Outcome::Bad));
    }

    #[test]
    fn parse_actions_get_the_longer_timeout() {
        let mut state = InternalState::default();
        let mut g = goal("g", 5);
        g.actions
            .push(in_progress(Tool::WebParseUnified, at() - Duration::minutes(15)));
        state.active_goals.push(g);

        let stale = time_out_stale_actions(&mut state, &adaptive_with_timeout(600), at());
        assert!(stale.is_empty());
        assert_eq!(
            state.active_goals[0].actions[0].status,
            ActionStatus::InProgress
        );
        assert!(state.active_goals[0].outcome.is_none());
    }

    /// Verifies locked goals survive and only the lowest queued goals are pruned.
    #[test]
    fn two_tier_capacity_keeps_locked_and_best_queued() {
        let mut state = InternalState::default();
        for (idx, priority) in [3u8, 4, 5].iter().enumerate() {
            let mut locked = goal(&format!("locked{idx}"), *priority);
            locked.progress = 0.5;
            state.active_goals.push(locked);
        }
        for (id, priority) in [("q9", 9u8), ("q2", 2), ("q7", 7), ("q1", 1)] {
            state.active_goals.push(goal(id, priority));
        }

        let report = cleanup(&mut state, at());

        let mut active: Vec<&str> = state
            .active_goals
            .iter()
            .map(|goal| goal.id.as_str())
            .collect();
        active.sort_unstable();
        assert_eq!(active, vec!["locked0", "locked1", "locked2", "q7", "q9"]);

        for id in ["q1", "q2"] {
            let pruned = state.find_goal(id).expect("archived");
            assert_eq!(pruned.status, GoalStatus::Abandoned);
            assert_eq!(pruned.outcome, Some(Outcome::Neutral));
        }
        assert_eq!(report.abandoned.len(), 2);
        assert!(state.recent_failures.is_empty());
    }

    #[test]
    fn locked_overflow_is_kept() {
        let mut state = InternalState::default();
        for idx in 0..7 {
            let mut locked = goal(&format!("l{idx}"), 5);
            locked.last_pursued = Some(at());
            state.active_goals.push(locked);
        }
        state.active_goals.push(goal("queued", 10));

        let report = cleanup(&mut state, at());
        assert_eq!(report.locked_overflow, 2);
        assert_eq!(state.active_goals.len(), 7);
        assert_eq!(
            state.find_goal("queued").expect("queued").status,
            GoalStatus::Abandoned
        );
    }

    #[test]
    fn stale_goals_are_abandoned_by_age() {
        let mut state = InternalState::default();
        let mut idle = goal("idle", 5);
        idle.created = at() - Duration::hours(49);
        let mut partial = goal("partial", 5);
        partial.created = at() - Duration::days(8);
        partial.progress = 0.5;
        let mut young = goal("young", 5);
        young.created = at() - Duration::hours(47);
        state.active_goals = vec![idle, partial, young];

        let report = cleanup(&mut state, at());
        assert_eq!(
            report.abandoned,
            vec![
                ("idle".to_string(), AbandonReason::NoProgress),
                ("partial".to_string(), AbandonReason::StalePartialProgress),
            ]
        );
        assert_eq!(state.active_goals.len(), 1);
    }

    #[test]
    fn repeated_failures_abandon_as_bad_and_feed_recent_failures() {
        let mut state = InternalState::default();
        let mut g = goal("flaky", 5);
        for idx in 0..11 {
            let mut action = Action::pending(Tool::Search, "q", at());
            if idx < 6 {
                action.status = ActionStatus::Completed;
                action.result = "ERROR: down".to_string();
            }
            g.actions.push(action);
        }
        g.progress = 6.0 / 11.0 - 0.1;
        state.active_goals.push(g);

        let report = cleanup(&mut state, at());
        assert_eq!(
            report.abandoned,
            vec![("flaky".to_string(), AbandonReason::RepeatedFailures)]
        );
        assert_eq!(state.recent_failures, vec!["goal flaky".to_string()]);
    }

    #[test]
    fn finished_goals_are_archived_and_failures_capped() {
        let mut state = InternalState {
            recent_failures: (0..10).map(|idx| format!("old {idx}")).collect(),
            ..InternalState::default()
        };
        let mut done = goal("done", 5);
        done.finish(GoalStatus::Completed, Outcome::Good);
        let mut failed = goal("failed", 5);
        failed.finish(GoalStatus::Abandoned, Outcome::Bad);
        state.active_goals = vec![done, failed];

        let report = cleanup(&mut state, at());
        assert_eq!(report.completed_count, 1);
        assert_eq!(report.archived, vec!["done".to_string(), "failed".to_string()]);
        assert!(state.active_goals.is_empty());
        assert_eq!(state.recent_failures.len(), RECENT_FAILURES_CAP);
        assert_eq!(state.recent_failures.last().map(String::as_str), Some("goal failed"));
        assert_eq!(state.recent_failures[0], "old 1");
    }

    #[test]
    fn durations_format_compactly() {
        assert_eq!(format_duration(Duration::seconds(42)), "42s");
        assert_eq!(format_duration(Duration::seconds(3_725)), "1h2m5s");
    }
}
