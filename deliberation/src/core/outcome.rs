//! Interpretation of tool results and the fixed post-processing hooks.
//!
//! The executor performs the dispatch; this module decides what the result
//! means for the action and its goal.

use chrono::{DateTime, Utc};

use crate::core::heuristics::extract_urls;
use crate::core::limits::FAILURE_THRESHOLD;
use crate::core::research::mark_answered;
use crate::core::types::{
    Action, ActionStatus, Goal, META_FOLLOWS_SEARCH, META_URLS, Outcome, Tool,
};

const SOFT_FAILURE_PREFIXES: &[&str] = &["error:", "failed:", "timeout:"];
const SOFT_FAILURE_MARKERS: &[&str] = &["403", "404", "no suitable urls"];
const SOFT_FAILURE_SCAN_CHARS: usize = 100;

/// Classified result of one tool dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    Success(String),
    /// The tool returned text that reports a failure.
    SoftFailure(String),
    /// The dispatch itself failed.
    Error(String),
}

impl ActionResult {
    /// Classify a raw dispatch result.
    pub fn classify(reply: Result<String, String>) -> Self {
        match reply {
            Err(err) => ActionResult::Error(err),
            Ok(text) if is_failure_result(&text) => ActionResult::SoftFailure(text),
            Ok(text) => ActionResult::Success(text),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ActionResult::Success(_))
    }

    /// Text recorded on the action. Every failure is recorded as `ERROR: ...`.
    fn into_recorded(self) -> String {
        match self {
            ActionResult::Success(text) => text,
            ActionResult::SoftFailure(text) => {
                let text = text.trim_start();
                let body = match text.get(..6) {
                    Some(prefix) if prefix.eq_ignore_ascii_case("error:") => text[6..].trim_start(),
                    _ => text,
                };
                format!("ERROR: {body}")
            }
            ActionResult::Error(err) => format!("ERROR: {err}"),
        }
    }
}

/// True when a recorded result reports a failure or timeout.
pub fn is_failure_result(result: &str) -> bool {
    let trimmed = result.trim_start().to_lowercase();
    if SOFT_FAILURE_PREFIXES
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
    {
        return true;
    }
    let head: String = trimmed.chars().take(SOFT_FAILURE_SCAN_CHARS).collect();
    SOFT_FAILURE_MARKERS
        .iter()
        .any(|marker| head.contains(marker))
}

/// What applying a result changed beyond the action itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionEffect {
    pub succeeded: bool,
    /// The failure pushed the goal over the failure threshold.
    pub outcome_turned_bad: bool,
    /// URLs a successful search produced (a parse action was queued for them).
    pub follow_up_urls: Vec<String>,
    pub answered_question: Option<String>,
}

/// Mark the action in flight.
pub fn begin_action(goal: &mut Goal, index: usize, now: DateTime<Utc>) {
    if let Some(action) = goal.actions.get_mut(index) {
        action.status = ActionStatus::InProgress;
        action.timestamp = now;
    }
}

/// Record a classified result on `goal.actions[index]` and run the hooks.
pub fn apply_action_result(
    goal: &mut Goal,
    index: usize,
    result: ActionResult,
    now: DateTime<Utc>,
) -> ActionEffect {
    let mut effect = ActionEffect {
        succeeded: result.is_success(),
        ..ActionEffect::default()
    };
    let Some(action) = goal.actions.get_mut(index) else {
        return effect;
    };
    action.status = ActionStatus::Completed;
    action.result = result.into_recorded();
    let tool = action.tool;
    let question_id = action.research_question_id().map(str::to_string);
    let recorded = action.result.clone();

    if !effect.succeeded {
        goal.failure_count += 1;
        if goal.failure_count >= FAILURE_THRESHOLD && goal.outcome != Some(Outcome::Bad) {
            goal.outcome = Some(Outcome::Bad);
            effect.outcome_turned_bad = true;
        }
        return effect;
    }

    goal.failure_count = 0;

    if tool == Tool::Search {
        let urls = extract_urls(&recorded);
        if let Some(first) = urls.first() {
            goal.actions.push(
                Action::pending(Tool::WebParseUnified, first.clone(), now)
                    .with_metadata(META_URLS, urls.join(","))
                    .with_metadata(META_FOLLOWS_SEARCH, "true"),
            );
        }
        effect.follow_up_urls = urls;
    }

    if let (Some(id), Some(plan)) = (question_id, goal.research_plan.as_mut()) {
        if mark_answered(plan, &id) {
            effect.answered_question = Some(id);
        }
    }
    effect
}
