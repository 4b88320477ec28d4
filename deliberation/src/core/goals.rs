//! Goal store view: locking, progress, selection, and the completion policy.
//!
//! All functions operate on plain goal values; persistence happens elsewhere.

use chrono::{DateTime, Duration, Utc};

use crate::core::limits::{
    RECENT_GOAL_WINDOW, SEARCH_LAST_PROGRESS_CAP, USEFUL_OUTPUT_MIN, USEFUL_OUTPUT_MIN_PARSE,
};
use crate::core::outcome::is_failure_result;
use crate::core::research::has_remaining_work;
use crate::core::types::{
    ActionStatus, Goal, GoalSource, GoalStatus, GoalTier, InternalState, Mission, MissionSource,
    Outcome, Tool,
};

/// A goal is locked once work has started on it; locked goals are never pruned.
pub fn is_locked(goal: &Goal) -> bool {
    goal.is_active()
        && (goal.progress > 0.0 || !goal.actions.is_empty() || goal.last_pursued.is_some())
}

pub fn locked_count(goals: &[Goal]) -> usize {
    goals.iter().filter(|goal| is_locked(goal)).count()
}

/// Recompute `goal.progress` from its actions and return the new value.
///
/// A parse action spawned by a completed search is left out of the
/// denominator while it is pending, and caps progress below 1.0 until it runs.
pub fn recompute_progress(goal: &mut Goal) -> f64 {
    let pending_followups = goal
        .actions
        .iter()
        .filter(|action| action.follows_search() && action.status != ActionStatus::Completed)
        .count();
    let total = goal.actions.len() - pending_followups;
    let completed = goal
        .actions
        .iter()
        .filter(|action| action.status == ActionStatus::Completed)
        .count();

    let mut progress = if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64
    };
    if pending_followups > 0 {
        progress = progress.min(SEARCH_LAST_PROGRESS_CAP);
    }
    goal.progress = progress;
    progress
}

/// At least one completed, non-failure result longer than the tool's minimum.
pub fn has_useful_output(goal: &Goal) -> bool {
    goal.actions.iter().any(|action| {
        if action.status != ActionStatus::Completed || is_failure_result(&action.result) {
            return false;
        }
        let min = match action.tool {
            Tool::WebParseUnified => USEFUL_OUTPUT_MIN_PARSE,
            Tool::Search | Tool::Synthesis => USEFUL_OUTPUT_MIN,
        };
        action.result.chars().count() > min
    })
}

/// True while consecutive failures are outstanding or the goal was already judged bad.
pub fn has_failures(goal: &Goal) -> bool {
    goal.failure_count > 0 || goal.outcome == Some(Outcome::Bad)
}

/// Pick the goal to pursue this cycle.
///
/// A goal with pending work pursued within `continuity_window` keeps the lock;
/// otherwise the highest priority wins, ties going to the oldest goal.
pub fn select_top_goal(goals: &[Goal], now: DateTime<Utc>, continuity_window: Duration) -> Option<usize> {
    let continuing = goals.iter().position(|goal| {
        goal.is_active()
            && goal.has_pending_work
            && goal
                .last_pursued
                .is_some_and(|pursued| now - pursued < continuity_window)
    });
    if continuing.is_some() {
        return continuing;
    }

    goals
        .iter()
        .enumerate()
        .filter(|(_, goal)| goal.is_active())
        .min_by(|(_, left), (_, right)| {
            right
                .priority
                .cmp(&left.priority)
                .then_with(|| left.created.cmp(&right.created))
        })
        .map(|(idx, _)| idx)
}

/// What the completion policy decides for a goal at the end of pursuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionVerdict {
    /// Work remains (progress below 1.0, actions pending, or plan unfinished).
    Continue,
    /// Finished with useful output and no failures.
    Complete,
    /// Finished but failures were recorded.
    AbandonFailed,
    /// Finished without any useful output.
    AbandonUseless,
}

/// Failures end a finished goal even when its research plan has open
/// questions; unanswered questions only hold back the other verdicts.
pub fn completion_verdict(goal: &Goal) -> CompletionVerdict {
    if goal.progress < 1.0 || goal.has_pending_actions() {
        return CompletionVerdict::Continue;
    }
    if has_failures(goal) {
        return CompletionVerdict::AbandonFailed;
    }
    if has_remaining_work(goal) {
        return CompletionVerdict::Continue;
    }
    if !has_useful_output(goal) {
        return CompletionVerdict::AbandonUseless;
    }
    CompletionVerdict::Complete
}

/// Apply a terminal verdict to the goal. `Continue` leaves it untouched.
pub fn apply_verdict(goal: &mut Goal, verdict: CompletionVerdict) {
    match verdict {
        CompletionVerdict::Continue => {}
        CompletionVerdict::Complete => goal.finish(GoalStatus::Completed, Outcome::Good),
        CompletionVerdict::AbandonFailed => goal.finish(GoalStatus::Abandoned, Outcome::Bad),
        CompletionVerdict::AbandonUseless => goal.finish(GoalStatus::Abandoned, Outcome::Neutral),
    }
}

/// Recompute progress and apply the completion policy in one step.
pub fn settle(goal: &mut Goal) -> CompletionVerdict {
    recompute_progress(goal);
    let verdict = completion_verdict(goal);
    apply_verdict(goal, verdict);
    verdict
}

/// Primary goal seeded from a newly promoted mission.
pub fn goal_from_mission(mission: &Mission, now: DateTime<Utc>) -> Goal {
    let source = match mission.source {
        MissionSource::User => GoalSource::User,
        MissionSource::Ai => GoalSource::Reflection,
    };
    let priority = (mission.priority * 10.0).round().clamp(1.0, 10.0) as u8;
    let mut goal = Goal::new(mission.description.clone(), source, priority, now);
    goal.mission_id = Some(mission.id.clone());
    goal
}

/// Outcome for a mission once every goal derived from it has finished.
///
/// `None` while a derived goal is still active or none exists yet.
pub fn mission_outcome(state: &InternalState, mission_id: &str) -> Option<Outcome> {
    let derived: Vec<&Goal> = state
        .active_goals
        .iter()
        .chain(state.completed_goals.iter())
        .filter(|goal| goal.mission_id.as_deref() == Some(mission_id))
        .collect();
    if derived.is_empty() || derived.iter().any(|goal| goal.is_active()) {
        return None;
    }
    if derived
        .iter()
        .any(|goal| goal.outcome == Some(Outcome::Good))
    {
        Some(Outcome::Good)
    } else {
        Some(Outcome::Bad)
    }
}

/// Goals a new proposal is checked against for duplicates.
///
/// Active goals plus recently abandoned ones among the last completed goals,
/// so a goal that just failed is not immediately proposed again.
pub fn duplicate_pool(state: &InternalState, now: DateTime<Utc>, novelty_window: Duration) -> Vec<&Goal> {
    let recently_abandoned = state
        .recent_completed(RECENT_GOAL_WINDOW)
        .iter()
        .filter(|goal| goal.status == GoalStatus::Abandoned)
        .filter(|goal| now - goal.last_pursued.unwrap_or(goal.created) < novelty_window);
    state
        .active_goals
        .iter()
        .filter(|goal| goal.is_active())
        .chain(recently_abandoned)
        .collect()
}

pub fn active_primaries(goals: &[Goal]) -> Vec<&Goal> {
    goals
        .iter()
        .filter(|goal| goal.is_active() && goal.tier == GoalTier::Primary)
        .collect()
}

pub fn active_secondaries(goals: &[Goal]) -> Vec<&Goal> {
    goals
        .iter()
        .filter(|goal| goal.is_active() && goal.tier == GoalTier::Secondary)
        .collect()
}
