//! Test-only collaborators and builders.
//!
//! Every fake is cheaply cloneable and shares its state, so a test can hand
//! one clone to the orchestrator and inspect the other afterwards.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::assessment::Assessment;
use crate::core::heuristics::cosine_similarity;
use crate::core::research::PlanDraft;
use crate::core::types::{
    Action, ActionStatus, CycleMetrics, Goal, GoalSource, InternalState, SelfModPayload,
    ThoughtRecord, Tool,
};
use crate::cycle::{Collaborators, CycleOrchestrator};
use crate::io::config::EngineConfig;
use crate::io::init::{InitOptions, init_state_dir};
use crate::io::memory::{Embedder, Memory, MemoryStore, ScoredMemory, SearchQuery};
use crate::io::reasoner::{
    Completion, GoalProposal, GoalProposals, PatternReport, Principle, PrincipleValidation,
    Reasoner, ReasoningBundle, Reflection, Reply, SecondaryGoalProposal,
};
use crate::io::state_store::StateStore;
use crate::io::tools::ToolExecutor;

type Scripted<T> = Mutex<VecDeque<Result<T, String>>>;

fn pop_or<T>(queue: &Scripted<T>, fallback: impl FnOnce() -> T) -> Result<T> {
    match queue.lock().expect("script lock").pop_front() {
        Some(Ok(value)) => Ok(value),
        Some(Err(message)) => Err(anyhow!(message)),
        None => Ok(fallback()),
    }
}

fn push<T>(queue: &Scripted<T>, value: Result<T, String>) {
    queue.lock().expect("script lock").push_back(value);
}

#[derive(Default)]
struct ReasonerScript {
    reflections: Scripted<Reflection>,
    proposals: Scripted<Reply<GoalProposals>>,
    secondaries: Scripted<Reply<SecondaryGoalProposal>>,
    thoughts: Scripted<Completion>,
    plans: Scripted<Reply<PlanDraft>>,
    assessments: Scripted<Reply<Assessment>>,
    syntheses: Scripted<Completion>,
    patterns: Scripted<Reply<PatternReport>>,
    validations: Scripted<Reply<PrincipleValidation>>,
    calls: Mutex<Vec<String>>,
}

/// Reasoner returning queued replies per method.
///
/// An empty queue yields a neutral default: an empty reflection, no
/// proposals, a declined secondary goal, no research plan, a "continue"
/// assessment, and no pattern update.
#[derive(Clone, Default)]
pub struct ScriptedReasoner {
    script: Arc<ReasonerScript>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reflection(&self, bundle: ReasoningBundle) {
        push(
            &self.script.reflections,
            Ok(Reflection {
                reply: Reply::parsed(bundle, 100),
                principles: Vec::new(),
            }),
        );
    }

    pub fn fail_next_reflection(&self, message: &str) {
        push(&self.script.reflections, Err(message.to_string()));
    }

    pub fn push_goal_proposals(&self, goals: Vec<GoalProposal>) {
        push(
            &self.script.proposals,
            Ok(Reply::parsed(GoalProposals { goals }, 50)),
        );
    }

    pub fn push_secondary(&self, proposal: SecondaryGoalProposal) {
        push(&self.script.secondaries, Ok(Reply::parsed(proposal, 20)));
    }

    pub fn push_thought(&self, text: &str, tokens: u32) {
        push(
            &self.script.thoughts,
            Ok(Completion {
                text: text.to_string(),
                tokens,
            }),
        );
    }

    pub fn push_plan(&self, draft: PlanDraft) {
        push(&self.script.plans, Ok(Reply::parsed(draft, 40)));
    }

    pub fn push_assessment(&self, assessment: Assessment) {
        push(&self.script.assessments, Ok(Reply::parsed(assessment, 30)));
    }

    pub fn fail_next_assessment(&self, message: &str) {
        push(&self.script.assessments, Err(message.to_string()));
    }

    pub fn push_synthesis(&self, text: &str) {
        push(
            &self.script.syntheses,
            Ok(Completion {
                text: text.to_string(),
                tokens: 60,
            }),
        );
    }

    pub fn push_patterns(&self, patterns: Vec<String>) {
        push(
            &self.script.patterns,
            Ok(Reply::parsed(PatternReport { patterns }, 10)),
        );
    }

    pub fn push_validation(&self, is_valid: bool, reasoning: &str) {
        push(
            &self.script.validations,
            Ok(Reply::parsed(
                PrincipleValidation {
                    is_valid,
                    reasoning: reasoning.to_string(),
                },
                15,
            )),
        );
    }

    /// Method names in call order, with the goal id where one applies.
    pub fn calls(&self) -> Vec<String> {
        self.script.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: String) {
        self.script.calls.lock().expect("calls lock").push(call);
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn reflect(&self, _state: &InternalState, _memories: &[ScoredMemory]) -> Result<Reflection> {
        self.record("reflect".to_string());
        pop_or(&self.script.reflections, || Reflection {
            reply: Reply::parsed(ReasoningBundle::default(), 0),
            principles: Vec::new(),
        })
    }

    async fn propose_goals(
        &self,
        _reasoning: &ReasoningBundle,
        _principles: &[Principle],
    ) -> Result<Reply<GoalProposals>> {
        self.record("propose_goals".to_string());
        pop_or(&self.script.proposals, || {
            Reply::parsed(GoalProposals::default(), 0)
        })
    }

    async fn propose_secondary_goal(
        &self,
        _primaries: &[Goal],
        _secondaries: &[Goal],
    ) -> Result<Reply<SecondaryGoalProposal>> {
        self.record("propose_secondary_goal".to_string());
        pop_or(&self.script.secondaries, || {
            Reply::parsed(SecondaryGoalProposal::default(), 0)
        })
    }

    async fn think_about_goal(&self, goal: &Goal, _related: &[ScoredMemory]) -> Result<Completion> {
        self.record(format!("think_about_goal:{}", goal.id));
        pop_or(&self.script.thoughts, || Completion {
            text: format!("Considering: {}", goal.description),
            tokens: 25,
        })
    }

    async fn plan_research(&self, goal: &Goal) -> Result<Reply<PlanDraft>> {
        self.record(format!("plan_research:{}", goal.id));
        pop_or(&self.script.plans, || Reply::unparsed("", 0))
    }

    async fn assess(&self, goal: &Goal) -> Result<Reply<Assessment>> {
        self.record(format!("assess:{}", goal.id));
        pop_or(&self.script.assessments, || {
            Reply::parsed(Assessment::default(), 0)
        })
    }

    async fn synthesize_research(&self, goal: &Goal) -> Result<Completion> {
        self.record(format!("synthesize_research:{}", goal.id));
        pop_or(&self.script.syntheses, Completion::default)
    }

    async fn detect_patterns(&self, _state: &InternalState) -> Result<Reply<PatternReport>> {
        self.record("detect_patterns".to_string());
        pop_or(&self.script.patterns, || Reply::unparsed("", 0))
    }

    async fn validate_principle(&self, payload: &SelfModPayload) -> Result<Reply<PrincipleValidation>> {
        self.record(format!("validate_principle:{}", payload.target_slot));
        pop_or(&self.script.validations, || {
            Reply::parsed(PrincipleValidation::default(), 0)
        })
    }
}

struct ToolReply {
    delay: Option<Duration>,
    result: Result<String, String>,
}

#[derive(Default)]
struct ToolScript {
    replies: Mutex<VecDeque<ToolReply>>,
    calls: Mutex<Vec<(Tool, String)>>,
}

/// Tool executor returning queued replies; an empty queue returns an empty string.
#[derive(Clone, Default)]
pub struct ScriptedTools {
    script: Arc<ToolScript>,
}

impl ScriptedTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, output: &str) {
        self.push(None, Ok(output.to_string()));
    }

    pub fn push_err(&self, message: &str) {
        self.push(None, Err(message.to_string()));
    }

    /// Reply after `delay` (use with a paused tokio clock).
    pub fn push_delayed(&self, delay: Duration, output: &str) {
        self.push(Some(delay), Ok(output.to_string()));
    }

    pub fn calls(&self) -> Vec<(Tool, String)> {
        self.script.calls.lock().expect("calls lock").clone()
    }

    fn push(&self, delay: Option<Duration>, result: Result<String, String>) {
        self.script
            .replies
            .lock()
            .expect("replies lock")
            .push_back(ToolReply { delay, result });
    }
}

#[async_trait]
impl ToolExecutor for ScriptedTools {
    async fn execute(&self, tool: Tool, description: &str) -> Result<String> {
        self.script
            .calls
            .lock()
            .expect("calls lock")
            .push((tool, description.to_string()));
        let reply = self
            .script
            .replies
            .lock()
            .expect("replies lock")
            .pop_front();
        let Some(reply) = reply else {
            return Ok(String::new());
        };
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        reply.result.map_err(|message| anyhow!(message))
    }
}

#[derive(Default)]
struct StoredState {
    state: InternalState,
    metrics: Vec<CycleMetrics>,
    thoughts: Vec<ThoughtRecord>,
    principles: Vec<Principle>,
    saves: usize,
}

/// State store kept in memory.
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    inner: Arc<Mutex<StoredState>>,
}

impl InMemoryStateStore {
    pub fn with_state(state: InternalState) -> Self {
        let store = Self::default();
        store.inner.lock().expect("state lock").state = state;
        store
    }

    pub fn state(&self) -> InternalState {
        self.inner.lock().expect("state lock").state.clone()
    }

    pub fn metrics(&self) -> Vec<CycleMetrics> {
        self.inner.lock().expect("state lock").metrics.clone()
    }

    pub fn thoughts(&self) -> Vec<ThoughtRecord> {
        self.inner.lock().expect("state lock").thoughts.clone()
    }

    pub fn principles(&self) -> Vec<Principle> {
        self.inner.lock().expect("state lock").principles.clone()
    }

    pub fn save_count(&self) -> usize {
        self.inner.lock().expect("state lock").saves
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load_state(&self) -> Result<InternalState> {
        Ok(self.state())
    }

    async fn save_state(&self, state: &InternalState) -> Result<()> {
        let mut inner = self.inner.lock().expect("state lock");
        inner.state = state.clone();
        inner.saves += 1;
        Ok(())
    }

    async fn save_metrics(&self, metrics: &CycleMetrics) -> Result<()> {
        self.inner
            .lock()
            .expect("state lock")
            .metrics
            .push(metrics.clone());
        Ok(())
    }

    async fn save_thought(&self, thought: &ThoughtRecord) -> Result<()> {
        self.inner
            .lock()
            .expect("state lock")
            .thoughts
            .push(thought.clone());
        Ok(())
    }

    async fn update_principle(&self, slot: u8, text: &str, rating: f64) -> Result<()> {
        let mut inner = self.inner.lock().expect("state lock");
        inner.principles.retain(|principle| principle.slot != slot);
        inner.principles.push(Principle {
            slot,
            text: text.to_string(),
            rating,
        });
        Ok(())
    }
}

#[derive(Default)]
struct MemoryContents {
    memories: Vec<Memory>,
    queries: Vec<SearchQuery>,
    fail_writes: bool,
}

/// Memory store ranking stored memories by cosine similarity.
#[derive(Clone, Default)]
pub struct InMemoryMemoryStore {
    inner: Arc<Mutex<MemoryContents>>,
}

impl InMemoryMemoryStore {
    pub fn memories(&self) -> Vec<Memory> {
        self.inner.lock().expect("memory lock").memories.clone()
    }

    pub fn queries(&self) -> Vec<SearchQuery> {
        self.inner.lock().expect("memory lock").queries.clone()
    }

    pub fn fail_writes(&self) {
        self.inner.lock().expect("memory lock").fail_writes = true;
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn search(&self, query: &SearchQuery, embedding: &[f32]) -> Result<Vec<ScoredMemory>> {
        let mut inner = self.inner.lock().expect("memory lock");
        inner.queries.push(query.clone());
        let mut found: Vec<ScoredMemory> = inner
            .memories
            .iter()
            .filter(|memory| {
                (memory.is_collective && query.include_collective)
                    || (!memory.is_collective && query.include_personal)
            })
            .map(|memory| ScoredMemory {
                score: cosine_similarity(embedding, &memory.embedding),
                memory: memory.clone(),
            })
            .filter(|scored| scored.score >= query.min_score)
            .collect();
        found.sort_by(|left, right| right.score.total_cmp(&left.score));
        found.truncate(query.limit);
        Ok(found)
    }

    async fn store(&self, mut memory: Memory) -> Result<String> {
        let mut inner = self.inner.lock().expect("memory lock");
        if inner.fail_writes {
            return Err(anyhow!("memory index unavailable"));
        }
        memory.id = format!("mem_{}", inner.memories.len() + 1);
        let id = memory.id.clone();
        inner.memories.push(memory);
        Ok(id)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Memory>> {
        Ok(self
            .inner
            .lock()
            .expect("memory lock")
            .memories
            .iter()
            .find(|memory| memory.id == id)
            .cloned())
    }

    async fn total_count(&self) -> Result<usize> {
        Ok(self.inner.lock().expect("memory lock").memories.len())
    }
}

const EMBEDDING_DIMS: usize = 32;

/// Deterministic bag-of-words embedder: texts sharing words embed close together.
#[derive(Clone, Default)]
pub struct HashEmbedder {
    failing: Arc<Mutex<bool>>,
}

impl HashEmbedder {
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().expect("embedder lock") = failing;
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if *self.failing.lock().expect("embedder lock") {
            return Err(anyhow!("embedding service unavailable"));
        }
        let mut vector = vec![0.0_f32; EMBEDDING_DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(7_usize, |acc, byte| acc.wrapping_mul(31).wrapping_add(byte as usize));
            vector[bucket % EMBEDDING_DIMS] += 1.0;
        }
        Ok(vector)
    }
}

/// Every fake wired together, plus the orchestrator factory.
#[derive(Clone, Default)]
pub struct Harness {
    pub reasoner: ScriptedReasoner,
    pub memory: InMemoryMemoryStore,
    pub embedder: HashEmbedder,
    pub tools: ScriptedTools,
    pub store: InMemoryStateStore,
}

impl Harness {
    pub fn with_state(state: InternalState) -> Self {
        Self {
            store: InMemoryStateStore::with_state(state),
            ..Self::default()
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            reasoner: Arc::new(self.reasoner.clone()),
            memory: Arc::new(self.memory.clone()),
            embedder: Arc::new(self.embedder.clone()),
            tools: Arc::new(self.tools.clone()),
            store: Arc::new(self.store.clone()),
        }
    }

    /// Orchestrator with a short index wait so tests stay fast.
    pub fn orchestrator(&self, config: EngineConfig) -> CycleOrchestrator {
        CycleOrchestrator::new(self.collaborators(), config)
    }

    pub fn default_config() -> EngineConfig {
        EngineConfig {
            memory_index_wait_ms: 0,
            ..EngineConfig::default()
        }
    }
}

/// Temporary state directory scaffolded with default config and empty state.
pub fn initialized_state_dir() -> tempfile::TempDir {
    let temp = tempfile::tempdir().expect("tempdir");
    init_state_dir(temp.path(), &InitOptions::default()).expect("init state dir");
    temp
}

/// Active goal with a fixed id.
pub fn goal(id: &str, description: &str, priority: u8, created: DateTime<Utc>) -> Goal {
    let mut goal = Goal::new(description, GoalSource::Reflection, priority, created);
    goal.id = id.to_string();
    goal
}

pub fn pending_action(tool: Tool, description: &str, at: DateTime<Utc>) -> Action {
    Action::pending(tool, description, at)
}

pub fn in_progress_action(tool: Tool, description: &str, started: DateTime<Utc>) -> Action {
    let mut action = Action::pending(tool, description, started);
    action.status = ActionStatus::InProgress;
    action
}

/// Proposal for a primary goal with default fields.
pub fn proposal(description: &str, priority: i64) -> GoalProposal {
    GoalProposal {
        description: description.to_string(),
        source: None,
        priority,
        tier: None,
        supports_goal_id: None,
        self_mod: None,
    }
}
