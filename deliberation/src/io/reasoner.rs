//! Reasoner abstraction over the language model.
//!
//! The [`Reasoner`] trait decouples the cycle from the model transport and its
//! prompts. Structured replies arrive as [`Reply<T>`]: the raw text is always
//! kept, and the parsed value is `None` when the text could not be decoded.
//! Tests use a scripted reasoner that returns predetermined replies.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::core::assessment::Assessment;
use crate::core::lenient::string_or_list;
use crate::core::research::PlanDraft;
use crate::core::types::{Goal, GoalSource, InternalState, SelfModPayload};
use crate::io::memory::ScoredMemory;

/// Model output with an optional structured interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<T> {
    pub raw: String,
    pub parsed: Option<T>,
    pub tokens: u32,
}

impl<T> Reply<T> {
    /// A reply whose structured value is already known.
    pub fn parsed(value: T, tokens: u32) -> Self {
        Self {
            raw: String::new(),
            parsed: Some(value),
            tokens,
        }
    }

    /// A reply that carried no usable structure.
    pub fn unparsed(raw: impl Into<String>, tokens: u32) -> Self {
        Self {
            raw: raw.into(),
            parsed: None,
            tokens,
        }
    }
}

impl<T: DeserializeOwned> Reply<T> {
    /// Decode JSON from model text, tolerating Markdown fences and prose
    /// around a single top-level object or array.
    pub fn from_raw(raw: impl Into<String>, tokens: u32) -> Self {
        let raw = raw.into();
        let parsed = decode_json::<T>(&raw);
        if parsed.is_none() {
            debug!(len = raw.len(), "reasoner reply did not decode; keeping raw text");
        }
        Self {
            raw,
            parsed,
            tokens,
        }
    }
}

fn decode_json<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let body = strip_fences(raw);
    if let Ok(value) = serde_json::from_str(body) {
        return Some(value);
    }
    let start = body.find(['{', '['])?;
    let close = if body[start..].starts_with('{') { '}' } else { ']' };
    let end = body.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&body[start..=end]).ok()
}

/// Return the contents of the first fenced block, or the trimmed input.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after_fence = &trimmed[open + 3..];
    let body_start = after_fence.find('\n').map_or(0, |idx| idx + 1);
    let body = &after_fence[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Free-text model output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub tokens: u32,
}

/// Something the engine learned, stored as collective memory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Learning {
    pub what: String,
    #[serde(default)]
    pub context: String,
    #[serde(default = "default_learning_category")]
    pub category: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_learning_category() -> String {
    "general".to_string()
}

fn default_confidence() -> f64 {
    0.7
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SelfAssessment {
    #[serde(default, deserialize_with = "string_or_list")]
    pub strengths: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub weaknesses: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub focus_areas: Vec<String>,
}

/// A mission the engine proposes for itself.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MissionProposal {
    pub description: String,
    #[serde(default = "default_mission_priority")]
    pub priority: f64,
}

fn default_mission_priority() -> f64 {
    0.5
}

/// Structured reflection on recent history.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReasoningBundle {
    #[serde(default)]
    pub reflection: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub insights: Vec<String>,
    #[serde(default)]
    pub learnings: Vec<Learning>,
    #[serde(default)]
    pub self_assessment: Option<SelfAssessment>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub knowledge_gaps: Vec<String>,
    #[serde(default)]
    pub missions_to_propose: Vec<MissionProposal>,
}

impl ReasoningBundle {
    /// Bundle for a reply that only carried free text.
    pub fn from_text(text: &str) -> Self {
        Self {
            reflection: text.trim().to_string(),
            ..Self::default()
        }
    }
}

/// Operating principle held in a numbered slot.
#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
pub struct Principle {
    pub slot: u8,
    pub text: String,
    pub rating: f64,
}

/// Output of [`Reasoner::reflect`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reflection {
    pub reply: Reply<ReasoningBundle>,
    pub principles: Vec<Principle>,
}

impl Reflection {
    /// The structured bundle, or one built from the raw text.
    pub fn bundle(&self) -> ReasoningBundle {
        self.reply
            .parsed
            .clone()
            .unwrap_or_else(|| ReasoningBundle::from_text(&self.reply.raw))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GoalProposal {
    pub description: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_goal_priority")]
    pub priority: i64,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub supports_goal_id: Option<String>,
    #[serde(default)]
    pub self_mod: Option<SelfModPayload>,
}

fn default_goal_priority() -> i64 {
    5
}

impl GoalProposal {
    /// Goal source named by the proposal; unknown values read as reflection.
    pub fn goal_source(&self) -> GoalSource {
        if self.self_mod.is_some() {
            return GoalSource::SelfModification;
        }
        match self.source.as_deref().map(str::trim) {
            Some("knowledge_gap") => GoalSource::KnowledgeGap,
            Some("user") => GoalSource::User,
            _ => GoalSource::Reflection,
        }
    }

    pub fn wants_secondary(&self) -> bool {
        self.tier
            .as_deref()
            .is_some_and(|tier| tier.trim().eq_ignore_ascii_case("secondary"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GoalProposals {
    #[serde(default)]
    pub goals: Vec<GoalProposal>,
}

/// A secondary goal supporting an existing primary; an empty description declines.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SecondaryGoalProposal {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub supports_goal_id: String,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PatternReport {
    #[serde(default, deserialize_with = "string_or_list")]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PrincipleValidation {
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub reasoning: String,
}

/// Abstraction over the language model. Every method is fallible; callers
/// treat errors as empty output.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Reflect on the state with the given recalled memories.
    async fn reflect(&self, state: &InternalState, memories: &[ScoredMemory]) -> Result<Reflection>;

    async fn propose_goals(
        &self,
        reasoning: &ReasoningBundle,
        principles: &[Principle],
    ) -> Result<Reply<GoalProposals>>;

    async fn propose_secondary_goal(
        &self,
        primaries: &[Goal],
        secondaries: &[Goal],
    ) -> Result<Reply<SecondaryGoalProposal>>;

    async fn think_about_goal(&self, goal: &Goal, related: &[ScoredMemory]) -> Result<Completion>;

    async fn plan_research(&self, goal: &Goal) -> Result<Reply<PlanDraft>>;

    async fn assess(&self, goal: &Goal) -> Result<Reply<Assessment>>;

    async fn synthesize_research(&self, goal: &Goal) -> Result<Completion>;

    async fn detect_patterns(&self, state: &InternalState) -> Result<Reply<PatternReport>>;

    async fn validate_principle(&self, payload: &SelfModPayload) -> Result<Reply<PrincipleValidation>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assessment::Recommendation;

    #[test]
    fn from_raw_strips_fences_and_prose() {
        let raw = "Here is my plan:\n```json\n{\"root_question\": \"why\", \"sub_questions\": [{\"question\": \"a\"}]}\n```\nThanks";
        let reply: Reply<PlanDraft> = Reply::from_raw(raw, 12);
        let plan = reply.parsed.expect("parsed");
        assert_eq!(plan.root_question, "why");
        assert_eq!(plan.sub_questions.len(), 1);
        assert_eq!(reply.tokens, 12);

        let inline: Reply<Assessment> =
            Reply::from_raw("I think {\"recommendation\": \"complete\"} is right", 0);
        assert_eq!(
            inline.parsed.expect("parsed").recommendation,
            Recommendation::Complete
        );
    }

    /// Ensures malformed output degrades to raw text instead of failing.
    #[test]
    fn from_raw_keeps_raw_on_failure() {
        let reply: Reply<GoalProposals> = Reply::from_raw("no structure at all", 3);
        assert!(reply.parsed.is_none());
        assert_eq!(reply.raw, "no structure at all");
    }

    #[test]
    fn bundle_accepts_single_strings_for_lists() {
        let reply: Reply<ReasoningBundle> = Reply::from_raw(
            r#"{"reflection":"ok","insights":"one insight","knowledge_gaps":["a","b"],
               "learnings":[{"what":"retry later","category":"tools","confidence":0.8}],
               "missions_to_propose":[{"description":"map the crate ecosystem"}]}"#,
            0,
        );
        let bundle = reply.parsed.expect("parsed");
        assert_eq!(bundle.insights, vec!["one insight".to_string()]);
        assert_eq!(bundle.knowledge_gaps.len(), 2);
        assert_eq!(bundle.learnings[0].confidence, 0.8);
        assert_eq!(bundle.missions_to_propose[0].priority, 0.5);
    }

    #[test]
    fn reflection_falls_back_to_raw_text() {
        let reflection = Reflection {
            reply: Reply::unparsed("  just thinking  ", 4),
            principles: Vec::new(),
        };
        assert_eq!(reflection.bundle().reflection, "just thinking");
    }

    #[test]
    fn proposal_source_and_tier_are_lenient() {
        let proposals: Reply<GoalProposals> = Reply::from_raw(
            r#"{"goals":[
                {"description":"a","source":"knowledge_gap","tier":"Secondary"},
                {"description":"b","source":"weird"},
                {"description":"c","self_mod":{"target_slot":5,"proposed_principle":"be brief"}}
            ]}"#,
            0,
        );
        let goals = proposals.parsed.expect("parsed").goals;
        assert_eq!(goals[0].goal_source(), GoalSource::KnowledgeGap);
        assert!(goals[0].wants_secondary());
        assert_eq!(goals[1].goal_source(), GoalSource::Reflection);
        assert_eq!(goals[1].priority, 5);
        assert_eq!(goals[2].goal_source(), GoalSource::SelfModification);
    }
}
