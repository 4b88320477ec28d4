//! Progress assessments and how their recommendations change a goal.

use serde::Deserialize;

use crate::core::types::{ActionStatus, Goal, GoalStatus, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressQuality {
    Good,
    Marginal,
    Poor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanValidity {
    Valid,
    Questionable,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    Continue,
    Adjust,
    Replan,
    Complete,
}

impl ProgressQuality {
    fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "good" => ProgressQuality::Good,
            "poor" => ProgressQuality::Poor,
            _ => ProgressQuality::Marginal,
        }
    }
}

impl PlanValidity {
    fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "questionable" => PlanValidity::Questionable,
            "invalid" => PlanValidity::Invalid,
            _ => PlanValidity::Valid,
        }
    }
}

impl Recommendation {
    fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "adjust" => Recommendation::Adjust,
            "replan" => Recommendation::Replan,
            "complete" => Recommendation::Complete,
            _ => Recommendation::Continue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Recommendation::Continue => "continue",
            Recommendation::Adjust => "adjust",
            Recommendation::Replan => "replan",
            Recommendation::Complete => "complete",
        }
    }
}

/// Assessment of a goal after an action ran.
///
/// Unknown or missing values fall back to a valid plan that should continue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "AssessmentFields")]
pub struct Assessment {
    pub progress_quality: ProgressQuality,
    pub plan_validity: PlanValidity,
    pub recommendation: Recommendation,
    pub reasoning: String,
}

impl Default for Assessment {
    fn default() -> Self {
        Self {
            progress_quality: ProgressQuality::Marginal,
            plan_validity: PlanValidity::Valid,
            recommendation: Recommendation::Continue,
            reasoning: String::new(),
        }
    }
}

impl Assessment {
    pub fn recommending(recommendation: Recommendation) -> Self {
        Self {
            recommendation,
            ..Self::default()
        }
    }
}

#[derive(Deserialize)]
struct AssessmentFields {
    #[serde(default)]
    progress_quality: String,
    #[serde(default)]
    plan_validity: String,
    #[serde(default)]
    recommendation: String,
    #[serde(default)]
    reasoning: String,
}

impl From<AssessmentFields> for Assessment {
    fn from(fields: AssessmentFields) -> Self {
        Self {
            progress_quality: ProgressQuality::parse_lenient(&fields.progress_quality),
            plan_validity: PlanValidity::parse_lenient(&fields.plan_validity),
            recommendation: Recommendation::parse_lenient(&fields.recommendation),
            reasoning: fields.reasoning,
        }
    }
}

/// What applying a recommendation did to the goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendationEffect {
    Unchanged,
    /// Pending actions and the research plan were discarded.
    Replanned { replan_count: u32, discarded: usize },
    /// The replan ceiling was reached; the goal was abandoned as bad.
    ReplanCapReached,
    Completed,
}

pub fn apply_recommendation(
    goal: &mut Goal,
    recommendation: Recommendation,
    replan_ceiling: u32,
) -> RecommendationEffect {
    match recommendation {
        Recommendation::Continue | Recommendation::Adjust => RecommendationEffect::Unchanged,
        Recommendation::Replan => {
            if goal.replan_count >= replan_ceiling {
                goal.finish(GoalStatus::Abandoned, Outcome::Bad);
                return RecommendationEffect::ReplanCapReached;
            }
            let before = goal.actions.len();
            goal.actions
                .retain(|action| action.status != ActionStatus::Pending);
            goal.research_plan = None;
            goal.replan_count += 1;
            RecommendationEffect::Replanned {
                replan_count: goal.replan_count,
                discarded: before - goal.actions.len(),
            }
        }
        Recommendation::Complete => {
            goal.progress = 1.0;
            let outcome = match goal.outcome {
                Some(Outcome::Bad) => Outcome::Bad,
                _ => Outcome::Good,
            };
            goal.finish(GoalStatus::Completed, outcome);
            RecommendationEffect::Completed
        }
    }
}
