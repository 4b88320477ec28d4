//! Research plans: dependency-ordered sub-questions plus a synthesis step.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::core::lenient::string_or_list;
use crate::core::types::{
    Action, ActionStatus, Goal, META_RESEARCH_QUESTION_ID, ResearchPlan, ResearchQuestion, Tool,
};

/// Plan as proposed by the reasoner, before ids and dependencies are checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PlanDraft {
    #[serde(default)]
    pub root_question: String,
    #[serde(default, alias = "questions")]
    pub sub_questions: Vec<QuestionDraft>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct QuestionDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub question: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub dependencies: Vec<String>,
}

/// Turn a draft into a plan the engine can walk.
///
/// Blank questions are dropped, missing or repeated ids become `q1..qn`, and
/// dependencies on unknown ids are discarded. Returns `None` when no question
/// survives.
pub fn build_plan(draft: PlanDraft, goal_description: &str) -> Option<ResearchPlan> {
    let mut questions: Vec<ResearchQuestion> = Vec::new();
    for (idx, raw) in draft.sub_questions.into_iter().enumerate() {
        let question = raw.question.trim().to_string();
        if question.is_empty() {
            continue;
        }
        let id = raw
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && !questions.iter().any(|q| &q.id == id))
            .unwrap_or_else(|| format!("q{}", idx + 1));
        questions.push(ResearchQuestion {
            id,
            question,
            dependencies: raw.dependencies,
            answered: false,
        });
    }
    if questions.is_empty() {
        return None;
    }

    let known: Vec<String> = questions.iter().map(|q| q.id.clone()).collect();
    for question in &mut questions {
        let own = question.id.clone();
        question
            .dependencies
            .retain(|dep| dep != &own && known.contains(dep));
    }

    let root_question = match draft.root_question.trim() {
        "" => goal_description.to_string(),
        root => root.to_string(),
    };
    let synthesis_needed = questions.len() >= 2;
    Some(ResearchPlan {
        root_question,
        sub_questions: questions,
        current_step: 0,
        synthesis_needed,
    })
}

/// Next action the goal's plan calls for, if any.
///
/// Picks the earliest unanswered question whose dependencies are answered and
/// which has no action in flight. When none is eligible and the plan needs a
/// synthesis that has not been queued yet, yields the synthesis action.
pub fn next_action(goal: &Goal, now: DateTime<Utc>) -> Option<Action> {
    let plan = goal.research_plan.as_ref()?;

    let eligible = plan.sub_questions.iter().find(|question| {
        !question.answered
            && dependencies_answered(plan, question)
            && !question_in_flight(goal, &question.id)
    });
    if let Some(question) = eligible {
        return Some(
            Action::pending(Tool::Search, question.question.clone(), now)
                .with_metadata(META_RESEARCH_QUESTION_ID, question.id.clone()),
        );
    }

    let synthesis_queued = goal
        .actions
        .iter()
        .any(|action| action.tool == Tool::Synthesis);
    if plan.synthesis_needed && !synthesis_queued {
        return Some(Action::pending(
            Tool::Synthesis,
            format!("Synthesize findings: {}", plan.root_question),
            now,
        ));
    }
    None
}

/// True while the plan still has unanswered questions or an unqueued synthesis.
pub fn has_remaining_work(goal: &Goal) -> bool {
    let Some(plan) = goal.research_plan.as_ref() else {
        return false;
    };
    let unanswered = plan.sub_questions.iter().any(|question| !question.answered);
    let synthesis_queued = goal
        .actions
        .iter()
        .any(|action| action.tool == Tool::Synthesis);
    unanswered || (plan.synthesis_needed && !synthesis_queued)
}

/// Mark a question answered and advance the plan cursor.
///
/// Returns `false` when the id is unknown or already answered.
pub fn mark_answered(plan: &mut ResearchPlan, question_id: &str) -> bool {
    let Some(question) = plan
        .sub_questions
        .iter_mut()
        .find(|question| question.id == question_id && !question.answered)
    else {
        return false;
    };
    question.answered = true;
    plan.current_step = plan
        .sub_questions
        .iter()
        .filter(|question| question.answered)
        .count();
    true
}

fn dependencies_answered(plan: &ResearchPlan, question: &ResearchQuestion) -> bool {
    question.dependencies.iter().all(|dep| {
        plan.sub_questions
            .iter()
            .any(|other| &other.id == dep && other.answered)
    })
}

fn question_in_flight(goal: &Goal, question_id: &str) -> bool {
    goal.actions.iter().any(|action| {
        action.status != ActionStatus::Completed
            && action.research_question_id() == Some(question_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::GoalSource;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap()
    }

    fn draft(questions: Vec<(Option<&str>, &str, Vec<&str>)>) -> PlanDraft {
        PlanDraft {
            root_question: "How do allocators work?".to_string(),
            sub_questions: questions
                .into_iter()
                .map(|(id, question, deps)| QuestionDraft {
                    id: id.map(str::to_string),
                    question: question.to_string(),
                    dependencies: deps.iter().map(|dep| dep.to_string()).collect(),
                })
                .collect(),
        }
    }

    fn goal_with(plan: ResearchPlan) -> Goal {
        let mut goal = Goal::new("Research allocators", GoalSource::Reflection, 5, at());
        goal.research_plan = Some(plan);
        goal
    }

    #[test]
    fn build_assigns_ids_and_prunes_unknown_dependencies() {
        let plan = build_plan(
            draft(vec![
                (None, "What is an arena?", vec![]),
                (Some("q1"), "Duplicate id question", vec!["q1", "zz"]),
                (Some(" "), "   ", vec![]),
                (Some("deep"), "How do slabs compare?", vec!["q1"]),
            ]),
            "Research allocators",
        )
        .expect("plan");

        let ids: Vec<&str> = plan.sub_questions.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q2", "deep"]);
        assert_eq!(plan.sub_questions[1].dependencies, vec!["q1".to_string()]);
        assert!(plan.synthesis_needed);
    }

    #[test]
    fn single_question_plan_needs_no_synthesis_and_empty_plan_is_none() {
        let plan = build_plan(draft(vec![(None, "Only one", vec![])]), "goal").expect("plan");
        assert!(!plan.synthesis_needed);
        assert!(build_plan(PlanDraft::default(), "goal").is_none());
    }

    #[test]
    fn root_question_defaults_to_goal_description() {
        let mut raw = draft(vec![(None, "Only one", vec![])]);
        raw.root_question = String::new();
        let plan = build_plan(raw, "Research allocators").expect("plan");
        assert_eq!(plan.root_question, "Research allocators");
    }

    /// Verifies dependency gating, then synthesis once every question is answered.
    #[test]
    fn next_action_walks_dependencies_then_synthesis() {
        let plan = build_plan(
            draft(vec![
                (Some("q1"), "Basics", vec![]),
                (Some("q2"), "Advanced", vec!["q1"]),
            ]),
            "goal",
        )
        .expect("plan");
        let mut goal = goal_with(plan);

        let first = next_action(&goal, at()).expect("first");
        assert_eq!(first.tool, Tool::Search);
        assert_eq!(first.description, "Basics");
        assert_eq!(first.research_question_id(), Some("q1"));

        goal.actions.push(first);
        assert!(next_action(&goal, at()).is_none(), "q1 in flight, q2 blocked");

        goal.actions[0].status = ActionStatus::Completed;
        let plan = goal.research_plan.as_mut().expect("plan");
        assert!(mark_answered(plan, "q1"));
        assert!(!mark_answered(plan, "q1"));
        assert_eq!(plan.current_step, 1);

        let second = next_action(&goal, at()).expect("second");
        assert_eq!(second.research_question_id(), Some("q2"));

        let plan = goal.research_plan.as_mut().expect("plan");
        mark_answered(plan, "q2");
        assert!(has_remaining_work(&goal), "synthesis not queued yet");
        let synthesis = next_action(&goal, at()).expect("synthesis");
        assert_eq!(synthesis.tool, Tool::Synthesis);

        goal.actions.push(synthesis);
        assert!(next_action(&goal, at()).is_none());
        assert!(!has_remaining_work(&goal));
    }

    #[test]
    fn goal_without_plan_has_no_next_action() {
        let goal = Goal::new("plain", GoalSource::User, 5, at());
        assert!(next_action(&goal, at()).is_none());
        assert!(!has_remaining_work(&goal));
    }
}
