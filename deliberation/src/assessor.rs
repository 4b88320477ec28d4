//! Post-action assessment: ask the reasoner how the goal is going and apply
//! its recommendation.

use tracing::{info, instrument, warn};

use crate::context::{CycleContext, Interrupted};
use crate::core::assessment::{Assessment, RecommendationEffect, apply_recommendation};
use crate::core::types::Goal;
use crate::io::reasoner::Reasoner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssessmentOutcome {
    pub assessment: Assessment,
    pub tokens: u32,
    pub effect: RecommendationEffect,
}

/// Assess `goal` and apply the recommendation.
///
/// A failed or unparseable assessment reads as "continue".
#[instrument(skip_all, fields(goal_id = %goal.id))]
pub async fn assess_goal(
    reasoner: &dyn Reasoner,
    ctx: &CycleContext,
    goal: &mut Goal,
    replan_ceiling: u32,
) -> Result<AssessmentOutcome, Interrupted> {
    let (assessment, tokens) = match ctx.run(reasoner.assess(goal)).await? {
        Ok(reply) => match reply.parsed {
            Some(assessment) => (assessment, reply.tokens),
            None => {
                warn!(raw_len = reply.raw.len(), "assessment did not parse; continuing");
                (Assessment::default(), reply.tokens)
            }
        },
        Err(err) => {
            warn!(error = %format!("{err:#}"), "assessment failed; continuing");
            (Assessment::default(), 0)
        }
    };

    let effect = apply_recommendation(goal, assessment.recommendation, replan_ceiling);
    info!(
        recommendation = assessment.recommendation.as_str(),
        effect = ?effect,
        replan_count = goal.replan_count,
        "assessment applied"
    );
    Ok(AssessmentOutcome {
        assessment,
        tokens,
        effect,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;

    use crate::core::assessment::Recommendation;
    use crate::core::limits::REPLAN_CAP;
    use crate::core::types::{Action, GoalSource, GoalStatus, Outcome, Tool};
    use crate::test_support::ScriptedReasoner;

    fn goal() -> Goal {
        let mut goal = Goal::new("Learn tokio", GoalSource::User, 5, Utc::now());
        goal.actions
            .push(Action::pending(Tool::Search, "tokio", Utc::now()));
        goal
    }

    #[tokio::test]
    async fn replan_discards_pending_work() {
        let reasoner = ScriptedReasoner::new();
        reasoner.push_assessment(Assessment::recommending(Recommendation::Replan));
        let ctx = CycleContext::new(Duration::from_secs(60));
        let mut g = goal();

        let outcome = assess_goal(&reasoner, &ctx, &mut g, REPLAN_CAP)
            .await
            .expect("live");

        assert_eq!(
            outcome.effect,
            RecommendationEffect::Replanned {
                replan_count: 1,
                discarded: 1
            }
        );
        assert!(g.actions.is_empty());
    }

    /// Verifies a reasoner failure degrades to "continue" without touching the goal.
    #[tokio::test]
    async fn reasoner_failure_reads_as_continue() {
        let reasoner = ScriptedReasoner::new();
        reasoner.fail_next_assessment("model unavailable");
        let ctx = CycleContext::new(Duration::from_secs(60));
        let mut g = goal();
        let before = g.clone();

        let outcome = assess_goal(&reasoner, &ctx, &mut g, REPLAN_CAP)
            .await
            .expect("live");

        assert_eq!(outcome.assessment.recommendation, Recommendation::Continue);
        assert_eq!(outcome.effect, RecommendationEffect::Unchanged);
        assert_eq!(g, before);
    }

    #[tokio::test]
    async fn replan_at_cap_abandons_goal() {
        let reasoner = ScriptedReasoner::new();
        reasoner.push_assessment(Assessment::recommending(Recommendation::Replan));
        let ctx = CycleContext::new(Duration::from_secs(60));
        let mut g = goal();
        g.replan_count = REPLAN_CAP;

        assess_goal(&reasoner, &ctx, &mut g, REPLAN_CAP)
            .await
            .expect("live");

        assert_eq!(g.status, GoalStatus::Abandoned);
        assert_eq!(g.outcome, Some(Outcome::Bad));
    }
}
