//! Shared deterministic types for the deliberation engine.
//!
//! These types define the persisted shape of the engine's state and the
//! contracts between core components. They carry no I/O and serialize to a
//! stable JSON layout.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::mission_queue::MissionQueue;

/// Who created a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionSource {
    User,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    Queued,
    Active,
    Completed,
    Abandoned,
}

/// A long-lived directive that seeds goals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub description: String,
    pub source: MissionSource,
    /// In `[0.0, 1.0]`; AI missions never exceed the AI ceiling on insertion.
    pub priority: f64,
    pub status: MissionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mission {
    pub fn new(
        description: impl Into<String>,
        source: MissionSource,
        priority: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("mission_{}", Uuid::new_v4().simple()),
            description: description.into(),
            source,
            priority,
            status: MissionStatus::Queued,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Where a goal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalSource {
    KnowledgeGap,
    Reflection,
    SelfModification,
    User,
}

/// Primary goals come from missions and reflection; secondary goals support them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalTier {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Active,
    Completed,
    Abandoned,
}

/// Judgement attached to a goal when it finishes (or fails repeatedly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Good,
    Bad,
    Neutral,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Good => "good",
            Outcome::Bad => "bad",
            Outcome::Neutral => "neutral",
        }
    }
}

/// Principle change carried by a self-modification goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfModPayload {
    /// Principle slot to overwrite (4-10; lower slots are fixed).
    pub target_slot: u8,
    pub proposed_principle: String,
    #[serde(default)]
    pub justification: String,
}

/// A concrete objective pursued across cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub description: String,
    pub source: GoalSource,
    pub tier: GoalTier,
    /// 1-10, larger is more important.
    pub priority: u8,
    pub created: DateTime<Utc>,
    pub last_pursued: Option<DateTime<Utc>>,
    pub progress: f64,
    pub status: GoalStatus,
    pub outcome: Option<Outcome>,
    pub failure_count: u32,
    pub replan_count: u32,
    pub has_pending_work: bool,
    pub actions: Vec<Action>,
    pub research_plan: Option<ResearchPlan>,
    pub self_mod: Option<SelfModPayload>,
    /// Ids of the primary goals a secondary goal supports.
    #[serde(default)]
    pub supports_goals: Vec<String>,
    /// Mission this goal was seeded from, if any.
    #[serde(default)]
    pub mission_id: Option<String>,
}

impl Goal {
    pub fn new(
        description: impl Into<String>,
        source: GoalSource,
        priority: u8,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("goal_{}", Uuid::new_v4().simple()),
            description: description.into(),
            source,
            tier: GoalTier::Primary,
            priority: priority.clamp(1, 10),
            created: now,
            last_pursued: None,
            progress: 0.0,
            status: GoalStatus::Active,
            outcome: None,
            failure_count: 0,
            replan_count: 0,
            has_pending_work: false,
            actions: Vec::new(),
            research_plan: None,
            self_mod: None,
            supports_goals: Vec::new(),
            mission_id: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == GoalStatus::Active
    }

    /// Close the goal with the given status and outcome.
    pub fn finish(&mut self, status: GoalStatus, outcome: Outcome) {
        self.status = status;
        self.outcome = Some(outcome);
        self.has_pending_work = false;
    }

    pub fn has_pending_actions(&self) -> bool {
        self.actions
            .iter()
            .any(|action| action.status != ActionStatus::Completed)
    }

    pub fn first_pending_action(&self) -> Option<usize> {
        self.actions
            .iter()
            .position(|action| action.status == ActionStatus::Pending)
    }
}

/// Tool an action dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Search,
    WebParseUnified,
    /// Handled by the engine itself; never dispatched to a tool registry.
    Synthesis,
}

impl Tool {
    pub fn as_str(self) -> &'static str {
        match self {
            Tool::Search => "search",
            Tool::WebParseUnified => "web_parse_unified",
            Tool::Synthesis => "synthesis",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Completed,
}

/// Metadata key linking an action to a research sub-question.
pub const META_RESEARCH_QUESTION_ID: &str = "research_question_id";
/// Metadata key holding every URL a search returned (comma-joined).
pub const META_URLS: &str = "urls";
/// Metadata flag on a parse action spawned by a completed search.
pub const META_FOLLOWS_SEARCH: &str = "follows_search";

/// One tool invocation attached to a goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub description: String,
    pub tool: Tool,
    pub status: ActionStatus,
    /// Creation time while pending; dispatch time once in progress.
    pub timestamp: DateTime<Utc>,
    /// Immutable once the action is completed.
    #[serde(default)]
    pub result: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Action {
    pub fn pending(tool: Tool, description: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            description: description.into(),
            tool,
            status: ActionStatus::Pending,
            timestamp: now,
            result: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn research_question_id(&self) -> Option<&str> {
        self.metadata
            .get(META_RESEARCH_QUESTION_ID)
            .map(String::as_str)
    }

    /// True for a parse action spawned by a completed search.
    pub fn follows_search(&self) -> bool {
        self.tool == Tool::WebParseUnified
            && self
                .metadata
                .get(META_FOLLOWS_SEARCH)
                .is_some_and(|flag| flag == "true")
    }
}

/// Dependency-ordered decomposition of a goal into sub-questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub root_question: String,
    pub sub_questions: Vec<ResearchQuestion>,
    pub current_step: usize,
    pub synthesis_needed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchQuestion {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub answered: bool,
}

/// Categorical cause for a cycle ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxThoughts,
    NaturalStop,
    CtxTimeout,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::MaxThoughts => "max_thoughts",
            StopReason::NaturalStop => "natural_stop",
            StopReason::CtxTimeout => "ctx_timeout",
        }
    }
}

/// Append-only per-cycle audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub cycle_id: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub thought_count: u32,
    pub action_count: u32,
    pub tokens_used: u32,
    pub goals_created: u32,
    pub goals_completed: u32,
    pub memories_stored: u32,
    pub stop_reason: StopReason,
}

/// Append-only per-thought audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThoughtRecord {
    pub cycle_id: u64,
    /// Strictly increasing within a cycle, starting at 1.
    pub thought_num: u32,
    pub content: String,
    pub tokens_used: u32,
    pub action_taken: bool,
    pub timestamp: DateTime<Utc>,
}

/// The singleton aggregate advanced by each cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InternalState {
    #[serde(flatten)]
    pub missions: MissionQueue,
    #[serde(default)]
    pub active_goals: Vec<Goal>,
    #[serde(default)]
    pub completed_goals: Vec<Goal>,
    #[serde(default)]
    pub knowledge_gaps: Vec<String>,
    #[serde(default)]
    pub recent_failures: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    pub last_cycle_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cycle_count: u64,
}

impl InternalState {
    pub fn find_goal(&self, id: &str) -> Option<&Goal> {
        self.active_goals
            .iter()
            .chain(self.completed_goals.iter())
            .find(|goal| goal.id == id)
    }

    /// The most recent `limit` completed goals, newest last.
    pub fn recent_completed(&self, limit: usize) -> &[Goal] {
        let start = self.completed_goals.len().saturating_sub(limit);
        &self.completed_goals[start..]
    }
}
