//! Orchestration for a single bounded deliberation cycle.
//!
//! A cycle loads the state, times out stale work, reflects, manages missions
//! and goals, pursues one goal, looks for patterns, cleans up, and persists.
//! Phase boundaries check the cycle context and the thought/token budget; a
//! stop skips the remaining phases but cleanup and persistence always run.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::assessor::assess_goal;
use crate::context::{CycleContext, Interrupted};
use crate::core::adaptive::{AdaptiveConfig, MIN_TOOL_TIMEOUT_SECS};
use crate::core::assessment::RecommendationEffect;
use crate::core::budget::CycleBudget;
use crate::core::cleaner::{CleanupReport, StaleAction, cleanup, time_out_stale_actions};
use crate::core::goals::{
    CompletionVerdict, active_primaries, active_secondaries, apply_verdict, completion_verdict,
    duplicate_pool, goal_from_mission, locked_count, mission_outcome, recompute_progress,
    select_top_goal, settle,
};
use crate::core::heuristics::{
    cosine_similarity, extract_search_keywords, find_textual_duplicate, is_research_goal,
};
use crate::core::limits::{
    MAX_ACTIVE_GOALS, MAX_ADMISSIONS_PER_CYCLE, SECONDARY_DEFAULT_PRIORITY,
    SELF_MOD_MAX_SLOT, SELF_MOD_MIN_SLOT, SEMANTIC_DUPLICATE_MIN_POOL,
};
use crate::core::research::{build_plan, next_action};
use crate::core::types::{
    Action, CycleMetrics, Goal, GoalSource, GoalStatus, GoalTier, InternalState, Mission,
    MissionSource, Outcome, StopReason, Tool,
};
use crate::executor::execute_next_action;
use crate::io::config::EngineConfig;
use crate::io::memory::{Embedder, Memory, MemoryStore, ScoredMemory, SearchQuery};
use crate::io::reasoner::{GoalProposal, Learning, Principle, PrincipleValidation, Reasoner, ReasoningBundle};
use crate::io::state_store::StateStore;
use crate::io::tools::ToolExecutor;
use crate::recorder::Recorder;

const REFLECTION_PROBE: &str = "recent activity patterns successes failures";
const REFLECTION_CONTEXT_LIMIT: usize = 10;
const RELATED_MEMORY_LIMIT: usize = 5;
const SELF_MOD_PRINCIPLE_RATING: f64 = 0.8;
const SELF_MOD_LEARNING_CONFIDENCE: f64 = 0.9;

/// A phase either continues (with a value) or stops the cycle.
type Flow<T = ()> = ControlFlow<StopReason, T>;

/// The collaborators a cycle talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub reasoner: Arc<dyn Reasoner>,
    pub memory: Arc<dyn MemoryStore>,
    pub embedder: Arc<dyn Embedder>,
    pub tools: Arc<dyn ToolExecutor>,
    pub store: Arc<dyn StateStore>,
}

/// Summary of one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle_id: u64,
    pub stop_reason: StopReason,
    pub metrics: CycleMetrics,
    /// Goal selected for pursuit, if any.
    pub pursued_goal: Option<String>,
    pub timed_out: Vec<StaleAction>,
    pub cleanup: CleanupReport,
}

pub struct CycleOrchestrator {
    deps: Collaborators,
    config: EngineConfig,
    adaptive: AdaptiveConfig,
}

impl CycleOrchestrator {
    pub fn new(deps: Collaborators, config: EngineConfig) -> Self {
        let adaptive = AdaptiveConfig::new(config.adaptive.clone());
        Self {
            deps,
            config,
            adaptive,
        }
    }

    /// Thresholds as of the last cycle.
    pub fn adaptive(&self) -> &AdaptiveConfig {
        &self.adaptive
    }

    /// Run one cycle bounded by the configured maximum duration.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let ctx = CycleContext::new(self.config.max_duration());
        self.run_cycle_with(&ctx).await
    }

    /// Run one cycle under a caller-provided context.
    ///
    /// State store failures propagate; everything else degrades and is logged.
    #[instrument(skip_all)]
    pub async fn run_cycle_with(&mut self, ctx: &CycleContext) -> Result<CycleReport> {
        let start = Utc::now();
        let mut state = self
            .deps
            .store
            .load_state()
            .await
            .context("load state")?;
        state.cycle_count += 1;
        let cycle_id = state.cycle_count;
        let mut recorder = Recorder::new(
            cycle_id,
            start,
            CycleBudget::new(
                self.config.max_tokens_per_cycle,
                self.config.max_thoughts_per_cycle,
            ),
        );
        info!(cycle_id, active_goals = state.active_goals.len(), "cycle started");

        let total_memories = match self.deps.memory.total_count().await {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "memory count unavailable; assuming 0");
                0
            }
        };
        self.adaptive.update_metrics(&state, total_memories);

        let timed_out = self.preflight(&mut state);

        let mut pursued_goal = None;
        let flow = self
            .run_phases(ctx, &mut state, &mut recorder, &mut pursued_goal)
            .await?;
        let stop_reason = match flow {
            ControlFlow::Break(reason) => reason,
            ControlFlow::Continue(()) => StopReason::NaturalStop,
        };

        let now = Utc::now();
        let cleanup = cleanup(&mut state, now);
        recorder.add_goals_completed(cleanup.completed_count);
        settle_active_mission(&mut state, now);
        state.last_cycle_time = Some(now);

        self.deps
            .store
            .save_state(&state)
            .await
            .context("save state")?;
        let metrics = recorder
            .flush(self.deps.store.as_ref(), stop_reason, Utc::now())
            .await?;
        info!(
            cycle_id,
            stop_reason = stop_reason.as_str(),
            thoughts = metrics.thought_count,
            actions = metrics.action_count,
            tokens = metrics.tokens_used,
            "cycle finished"
        );

        Ok(CycleReport {
            cycle_id,
            stop_reason,
            metrics,
            pursued_goal,
            timed_out,
            cleanup,
        })
    }

    /// Time out stale in-progress actions and settle the goals they belonged to.
    fn preflight(&self, state: &mut InternalState) -> Vec<StaleAction> {
        let stale = time_out_stale_actions(state, &self.adaptive, Utc::now());
        for goal in &mut state.active_goals {
            if stale.iter().any(|action| action.goal_id == goal.id) {
                let verdict = settle(goal);
                debug!(goal_id = %goal.id, verdict = ?verdict, "settled goal after timeout");
            }
        }
        stale
    }

    async fn run_phases(
        &self,
        ctx: &CycleContext,
        state: &mut InternalState,
        recorder: &mut Recorder,
        pursued_goal: &mut Option<String>,
    ) -> Result<Flow> {
        if let ControlFlow::Break(reason) = checkpoint(ctx, recorder) {
            return Ok(ControlFlow::Break(reason));
        }
        let (bundle, principles) = match self.reflect(ctx, state, recorder).await? {
            ControlFlow::Continue(reflected) => reflected,
            ControlFlow::Break(reason) => return Ok(ControlFlow::Break(reason)),
        };

        if let ControlFlow::Break(reason) = checkpoint(ctx, recorder) {
            return Ok(ControlFlow::Break(reason));
        }
        if let ControlFlow::Break(reason) = self
            .manage_goals(ctx, state, recorder, &bundle, &principles)
            .await?
        {
            return Ok(ControlFlow::Break(reason));
        }

        if let ControlFlow::Break(reason) = checkpoint(ctx, recorder) {
            return Ok(ControlFlow::Break(reason));
        }
        if let ControlFlow::Break(reason) = self.pursue(ctx, state, recorder, pursued_goal).await? {
            return Ok(ControlFlow::Break(reason));
        }

        if let ControlFlow::Break(reason) = checkpoint(ctx, recorder) {
            return Ok(ControlFlow::Break(reason));
        }
        self.detect_patterns(ctx, state, recorder).await
    }

    #[instrument(skip_all, fields(cycle_id = recorder.cycle_id()))]
    async fn reflect(
        &self,
        ctx: &CycleContext,
        state: &mut InternalState,
        recorder: &mut Recorder,
    ) -> Result<Flow<(ReasoningBundle, Vec<Principle>)>> {
        let query = SearchQuery::collective(
            REFLECTION_PROBE,
            REFLECTION_CONTEXT_LIMIT,
            self.adaptive.reflection_search_threshold(),
        );
        let memories = match self.search_memories(ctx, &query).await? {
            ControlFlow::Continue(found) => found,
            ControlFlow::Break(reason) => return Ok(ControlFlow::Break(reason)),
        };

        let reflected = match ctx.run(self.deps.reasoner.reflect(state, &memories)).await {
            Ok(reflected) => reflected,
            Err(interrupted) => return Ok(stop(interrupted)),
        };
        let (bundle, principles, tokens) = match reflected {
            Ok(reflection) => (
                reflection.bundle(),
                reflection.principles,
                reflection.reply.tokens,
            ),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "reflection failed; continuing with empty reasoning");
                (ReasoningBundle::default(), Vec::new(), 0)
            }
        };
        recorder.record_thought(bundle.reflection.clone(), tokens, false, Utc::now());

        if !bundle.knowledge_gaps.is_empty() {
            state.knowledge_gaps = bundle.knowledge_gaps.clone();
        }
        let now = Utc::now();
        for proposal in &bundle.missions_to_propose {
            let description = proposal.description.trim();
            if description.is_empty() {
                continue;
            }
            let mission = Mission::new(description, MissionSource::Ai, proposal.priority, now);
            let outcome = state.missions.enqueue(mission, now);
            info!(outcome = ?outcome, "enqueued proposed mission");
        }

        if self.config.store_insights && !bundle.learnings.is_empty() {
            let mut stored = 0;
            for learning in &bundle.learnings {
                match self.store_learning(ctx, learning, recorder).await? {
                    ControlFlow::Continue(true) => stored += 1,
                    ControlFlow::Continue(false) => {}
                    ControlFlow::Break(reason) => return Ok(ControlFlow::Break(reason)),
                }
            }
            if stored > 0 {
                if let Err(interrupted) = ctx
                    .run(tokio::time::sleep(self.config.memory_index_wait()))
                    .await
                {
                    return Ok(stop(interrupted));
                }
            }
        }

        Ok(ControlFlow::Continue((bundle, principles)))
    }

    #[instrument(skip_all, fields(cycle_id = recorder.cycle_id()))]
    async fn manage_goals(
        &self,
        ctx: &CycleContext,
        state: &mut InternalState,
        recorder: &mut Recorder,
        bundle: &ReasoningBundle,
        principles: &[Principle],
    ) -> Result<Flow> {
        let now = Utc::now();
        let decay = state.missions.decay(now);
        if !decay.dropped.is_empty() {
            info!(dropped = ?decay.dropped, "missions decayed out of the queue");
        }
        if let Some(mission) = state.missions.promote_active(now) {
            info!(mission_id = %mission.id, "mission promoted");
        }
        if let Some(mission) = unseeded_mission(state) {
            let goal = goal_from_mission(&mission, now);
            info!(mission_id = %mission.id, goal_id = %goal.id, "goal seeded from mission");
            state.active_goals.push(goal);
            recorder.count_goal_created();
        }

        if locked_count(&state.active_goals) >= MAX_ACTIVE_GOALS {
            info!(cap = MAX_ACTIVE_GOALS, "locked goals at capacity; skipping admission");
            return Ok(ControlFlow::Continue(()));
        }

        let proposals = match ctx
            .run(self.deps.reasoner.propose_goals(bundle, principles))
            .await
        {
            Ok(Ok(reply)) => {
                recorder.charge_tokens(reply.tokens);
                reply.parsed.map(|parsed| parsed.goals).unwrap_or_default()
            }
            Ok(Err(err)) => {
                warn!(error = %format!("{err:#}"), "goal proposal failed");
                Vec::new()
            }
            Err(interrupted) => return Ok(stop(interrupted)),
        };

        let mut admitted = 0;
        for proposal in &proposals {
            if admitted >= MAX_ADMISSIONS_PER_CYCLE {
                debug!(limit = MAX_ADMISSIONS_PER_CYCLE, "admission limit reached");
                break;
            }
            if let Err(interrupted) = ctx.check() {
                return Ok(stop(interrupted));
            }
            let Some(goal) = goal_from_proposal(proposal, state, now) else {
                continue;
            };
            match self.find_duplicate(ctx, state, &goal.description, now).await? {
                ControlFlow::Break(reason) => return Ok(ControlFlow::Break(reason)),
                ControlFlow::Continue(Some(existing)) => {
                    debug!(description = %goal.description, existing = %existing, "skipping duplicate goal");
                    continue;
                }
                ControlFlow::Continue(None) => {}
            }
            info!(goal_id = %goal.id, source = ?goal.source, priority = goal.priority, "goal admitted");
            state.active_goals.push(goal);
            recorder.count_goal_created();
            admitted += 1;
        }

        if self.config.enable_secondary_goals {
            return self.propose_secondary(ctx, state, recorder, now).await;
        }
        Ok(ControlFlow::Continue(()))
    }

    async fn propose_secondary(
        &self,
        ctx: &CycleContext,
        state: &mut InternalState,
        recorder: &mut Recorder,
        now: DateTime<Utc>,
    ) -> Result<Flow> {
        if locked_count(&state.active_goals) >= MAX_ACTIVE_GOALS {
            return Ok(ControlFlow::Continue(()));
        }
        let primaries: Vec<Goal> = active_primaries(&state.active_goals)
            .into_iter()
            .cloned()
            .collect();
        if primaries.is_empty() {
            return Ok(ControlFlow::Continue(()));
        }
        let secondaries: Vec<Goal> = active_secondaries(&state.active_goals)
            .into_iter()
            .cloned()
            .collect();

        let proposal = match ctx
            .run(
                self.deps
                    .reasoner
                    .propose_secondary_goal(&primaries, &secondaries),
            )
            .await
        {
            Ok(Ok(reply)) => {
                recorder.charge_tokens(reply.tokens);
                reply.parsed
            }
            Ok(Err(err)) => {
                warn!(error = %format!("{err:#}"), "secondary goal proposal failed");
                None
            }
            Err(interrupted) => return Ok(stop(interrupted)),
        };
        let Some(proposal) = proposal else {
            return Ok(ControlFlow::Continue(()));
        };
        let description = proposal.description.trim();
        if description.is_empty() {
            debug!("secondary goal declined");
            return Ok(ControlFlow::Continue(()));
        }
        if !primaries
            .iter()
            .any(|primary| primary.id == proposal.supports_goal_id)
        {
            warn!(supports = %proposal.supports_goal_id, "secondary goal supports no active primary; dropped");
            return Ok(ControlFlow::Continue(()));
        }

        match self.find_duplicate(ctx, state, description, now).await? {
            ControlFlow::Break(reason) => return Ok(ControlFlow::Break(reason)),
            ControlFlow::Continue(Some(existing)) => {
                debug!(existing = %existing, "secondary goal duplicates an existing goal");
                return Ok(ControlFlow::Continue(()));
            }
            ControlFlow::Continue(None) => {}
        }

        let priority = u8::try_from(proposal.priority)
            .ok()
            .filter(|priority| (1..=10).contains(priority))
            .unwrap_or(SECONDARY_DEFAULT_PRIORITY);
        let mut goal = Goal::new(description, GoalSource::Reflection, priority, now);
        goal.tier = GoalTier::Secondary;
        goal.supports_goals = vec![proposal.supports_goal_id.clone()];
        info!(goal_id = %goal.id, supports = %proposal.supports_goal_id, "secondary goal admitted");
        state.active_goals.push(goal);
        recorder.count_goal_created();
        Ok(ControlFlow::Continue(()))
    }

    /// Id of an existing goal the description duplicates, textually or by
    /// embedding similarity.
    async fn find_duplicate(
        &self,
        ctx: &CycleContext,
        state: &InternalState,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Flow<Option<String>>> {
        let pool = duplicate_pool(state, now, self.adaptive.novelty_window());
        if let Some((id, rule)) = find_textual_duplicate(description, pool.iter().copied()) {
            debug!(existing = id, rule = ?rule, "textual duplicate");
            return Ok(ControlFlow::Continue(Some(id.to_string())));
        }
        if pool.len() < SEMANTIC_DUPLICATE_MIN_POOL {
            return Ok(ControlFlow::Continue(None));
        }

        let threshold = self.adaptive.duplicate_similarity_threshold();
        let proposal = match ctx.run(self.deps.embedder.embed(description)).await {
            Ok(Ok(embedding)) => embedding,
            Ok(Err(err)) => {
                warn!(error = %format!("{err:#}"), "duplicate check embedding failed; admitting");
                return Ok(ControlFlow::Continue(None));
            }
            Err(interrupted) => return Ok(stop(interrupted)),
        };
        for goal in &pool {
            let existing = match ctx.run(self.deps.embedder.embed(&goal.description)).await {
                Ok(Ok(embedding)) => embedding,
                Ok(Err(err)) => {
                    warn!(error = %format!("{err:#}"), "duplicate check embedding failed; admitting");
                    return Ok(ControlFlow::Continue(None));
                }
                Err(interrupted) => return Ok(stop(interrupted)),
            };
            let similarity = cosine_similarity(&proposal, &existing);
            if similarity > threshold {
                debug!(existing = %goal.id, similarity, threshold, "semantic duplicate");
                return Ok(ControlFlow::Continue(Some(goal.id.clone())));
            }
        }
        Ok(ControlFlow::Continue(None))
    }

    #[instrument(skip_all, fields(cycle_id = recorder.cycle_id()))]
    async fn pursue(
        &self,
        ctx: &CycleContext,
        state: &mut InternalState,
        recorder: &mut Recorder,
        pursued_goal: &mut Option<String>,
    ) -> Result<Flow> {
        let now = Utc::now();
        let Some(index) = select_top_goal(&state.active_goals, now, self.adaptive.continuity_window())
        else {
            debug!("no active goal to pursue");
            return Ok(ControlFlow::Continue(()));
        };
        let goal = &mut state.active_goals[index];
        goal.last_pursued = Some(now);
        *pursued_goal = Some(goal.id.clone());
        info!(goal_id = %goal.id, priority = goal.priority, progress = goal.progress, "pursuing goal");

        let flow = if goal.source == GoalSource::SelfModification && goal.self_mod.is_some() {
            self.test_principle_modification(ctx, goal, recorder).await?
        } else {
            self.advance_goal(ctx, goal, recorder).await?
        };
        goal.has_pending_work = goal.is_active() && goal.has_pending_actions();
        Ok(flow)
    }

    /// Execute, assess, settle, then queue the next action when needed.
    async fn advance_goal(
        &self,
        ctx: &CycleContext,
        goal: &mut Goal,
        recorder: &mut Recorder,
    ) -> Result<Flow> {
        let mut executed = false;
        let mut replanned = false;

        let report = match execute_next_action(self.deps.tools.as_ref(), ctx, goal, |tool| {
            self.tool_timeout(tool)
        })
        .await
        {
            Ok(report) => report,
            Err(interrupted) => return Ok(stop(interrupted)),
        };
        if let Some(report) = report {
            executed = true;
            recorder.count_action();
            let assessed = match assess_goal(
                self.deps.reasoner.as_ref(),
                ctx,
                goal,
                self.adaptive.replan_ceiling(),
            )
            .await
            {
                Ok(assessed) => assessed,
                Err(interrupted) => return Ok(stop(interrupted)),
            };
            recorder.record_thought(
                format!(
                    "{} '{}' -> {} ({})",
                    report.tool.as_str(),
                    report.description,
                    if report.effect.succeeded { "ok" } else { "failed" },
                    assessed.assessment.recommendation.as_str()
                ),
                assessed.tokens,
                true,
                Utc::now(),
            );
            match assessed.effect {
                RecommendationEffect::Replanned { .. } => replanned = true,
                RecommendationEffect::Completed => {
                    if let ControlFlow::Break(reason) =
                        self.finish_research(ctx, goal, recorder).await?
                    {
                        return Ok(ControlFlow::Break(reason));
                    }
                }
                RecommendationEffect::Unchanged | RecommendationEffect::ReplanCapReached => {}
            }
        }

        if goal.is_active() {
            recompute_progress(goal);
            if !replanned {
                let verdict = completion_verdict(goal);
                if verdict == CompletionVerdict::Complete {
                    if let ControlFlow::Break(reason) =
                        self.finish_research(ctx, goal, recorder).await?
                    {
                        apply_verdict(goal, verdict);
                        return Ok(ControlFlow::Break(reason));
                    }
                }
                apply_verdict(goal, verdict);
                if verdict != CompletionVerdict::Continue {
                    info!(goal_id = %goal.id, verdict = ?verdict, "goal finished");
                }
            }
        }

        if goal.is_active() && (!executed || replanned) && !goal.has_pending_actions() {
            if let ControlFlow::Break(reason) = self.create_next_action(ctx, goal, recorder).await? {
                return Ok(ControlFlow::Break(reason));
            }
            recompute_progress(goal);
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Think about the goal, plan research when it calls for it, and queue
    /// the next action.
    async fn create_next_action(
        &self,
        ctx: &CycleContext,
        goal: &mut Goal,
        recorder: &mut Recorder,
    ) -> Result<Flow> {
        let keywords = extract_search_keywords(&goal.description);
        let query = SearchQuery::collective(
            keywords.clone(),
            RELATED_MEMORY_LIMIT,
            self.adaptive.search_threshold,
        );
        let related = match self.search_memories(ctx, &query).await? {
            ControlFlow::Continue(found) => found,
            ControlFlow::Break(reason) => return Ok(ControlFlow::Break(reason)),
        };

        if let ControlFlow::Break(reason) = checkpoint(ctx, recorder) {
            return Ok(ControlFlow::Break(reason));
        }
        match ctx
            .run(self.deps.reasoner.think_about_goal(goal, &related))
            .await
        {
            Ok(Ok(thought)) => recorder.record_thought(thought.text, thought.tokens, false, Utc::now()),
            Ok(Err(err)) => warn!(error = %format!("{err:#}"), "thinking about goal failed"),
            Err(interrupted) => return Ok(stop(interrupted)),
        }

        if let Err(interrupted) = ctx.check() {
            return Ok(stop(interrupted));
        }
        if goal.research_plan.is_none() && is_research_goal(&goal.description) {
            match ctx.run(self.deps.reasoner.plan_research(goal)).await {
                Ok(Ok(reply)) => {
                    recorder.charge_tokens(reply.tokens);
                    goal.research_plan = reply
                        .parsed
                        .and_then(|draft| build_plan(draft, &goal.description));
                    if goal.research_plan.is_none() {
                        debug!(goal_id = %goal.id, "no usable research plan; falling back to search");
                    }
                }
                Ok(Err(err)) => warn!(error = %format!("{err:#}"), "research planning failed"),
                Err(interrupted) => return Ok(stop(interrupted)),
            }
        }

        let now = Utc::now();
        let action = if goal.research_plan.is_some() {
            next_action(goal, now)
        } else {
            Some(Action::pending(Tool::Search, keywords, now))
        };
        if let Some(action) = action {
            info!(goal_id = %goal.id, tool = action.tool.as_str(), description = %action.description, "action queued");
            goal.actions.push(action);
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Synthesize a finished research plan into collective memory.
    async fn finish_research(
        &self,
        ctx: &CycleContext,
        goal: &Goal,
        recorder: &mut Recorder,
    ) -> Result<Flow> {
        let Some(plan) = goal
            .research_plan
            .as_ref()
            .filter(|plan| plan.synthesis_needed)
        else {
            return Ok(ControlFlow::Continue(()));
        };
        let synthesis = match ctx.run(self.deps.reasoner.synthesize_research(goal)).await {
            Ok(Ok(synthesis)) => synthesis,
            Ok(Err(err)) => {
                warn!(error = %format!("{err:#}"), "research synthesis failed");
                return Ok(ControlFlow::Continue(()));
            }
            Err(interrupted) => return Ok(stop(interrupted)),
        };
        recorder.charge_tokens(synthesis.tokens);
        if synthesis.text.trim().is_empty() {
            return Ok(ControlFlow::Continue(()));
        }

        let content = format!("{}\n{}", plan.root_question, synthesis.text);
        let stored = self
            .store_memory(ctx, &content, recorder, |embedding, now| {
                Memory::from_synthesis(&plan.root_question, &synthesis.text, &goal.id, embedding, now)
            })
            .await?;
        if let ControlFlow::Break(reason) = stored {
            return Ok(ControlFlow::Break(reason));
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Validate a proposed principle and apply it when the reasoner agrees.
    #[instrument(skip_all, fields(goal_id = %goal.id))]
    async fn test_principle_modification(
        &self,
        ctx: &CycleContext,
        goal: &mut Goal,
        recorder: &mut Recorder,
    ) -> Result<Flow> {
        let Some(payload) = goal.self_mod.clone() else {
            return Ok(ControlFlow::Continue(()));
        };
        let (validation, tokens) = match ctx.run(self.deps.reasoner.validate_principle(&payload)).await {
            Ok(Ok(reply)) => (reply.parsed.unwrap_or_default(), reply.tokens),
            Ok(Err(err)) => {
                warn!(error = %format!("{err:#}"), "principle validation failed");
                (PrincipleValidation::default(), 0)
            }
            Err(interrupted) => return Ok(stop(interrupted)),
        };
        recorder.record_thought(
            format!(
                "Principle slot {} {}: {}",
                payload.target_slot,
                if validation.is_valid { "accepted" } else { "rejected" },
                validation.reasoning
            ),
            tokens,
            false,
            Utc::now(),
        );

        if !validation.is_valid {
            goal.finish(GoalStatus::Abandoned, Outcome::Neutral);
            info!(slot = payload.target_slot, "principle change rejected");
            return Ok(ControlFlow::Continue(()));
        }

        self.deps
            .store
            .update_principle(
                payload.target_slot,
                &payload.proposed_principle,
                SELF_MOD_PRINCIPLE_RATING,
            )
            .await
            .with_context(|| format!("update principle slot {}", payload.target_slot))?;
        goal.progress = 1.0;
        goal.finish(GoalStatus::Completed, Outcome::Good);
        info!(slot = payload.target_slot, "principle updated");

        let learning = Learning {
            what: format!(
                "Principle slot {} now reads: {}",
                payload.target_slot, payload.proposed_principle
            ),
            context: payload.justification.clone(),
            category: "self_modification".to_string(),
            confidence: SELF_MOD_LEARNING_CONFIDENCE,
        };
        if let ControlFlow::Break(reason) = self.store_learning(ctx, &learning, recorder).await? {
            return Ok(ControlFlow::Break(reason));
        }
        Ok(ControlFlow::Continue(()))
    }

    async fn detect_patterns(
        &self,
        ctx: &CycleContext,
        state: &mut InternalState,
        recorder: &mut Recorder,
    ) -> Result<Flow> {
        match ctx.run(self.deps.reasoner.detect_patterns(state)).await {
            Ok(Ok(reply)) => {
                recorder.charge_tokens(reply.tokens);
                if let Some(report) = reply.parsed {
                    debug!(patterns = report.patterns.len(), "patterns updated");
                    state.patterns = report.patterns;
                }
            }
            Ok(Err(err)) => warn!(error = %format!("{err:#}"), "pattern detection failed"),
            Err(interrupted) => return Ok(stop(interrupted)),
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Embed the query text and search memories. Embedding failures propagate;
    /// search failures yield no memories.
    async fn search_memories(
        &self,
        ctx: &CycleContext,
        query: &SearchQuery,
    ) -> Result<Flow<Vec<ScoredMemory>>> {
        let embedding = match ctx.run(self.deps.embedder.embed(&query.text)).await {
            Ok(embedding) => embedding.with_context(|| format!("embed '{}'", query.text))?,
            Err(interrupted) => return Ok(stop(interrupted)),
        };
        match ctx.run(self.deps.memory.search(query, &embedding)).await {
            Ok(Ok(found)) => Ok(ControlFlow::Continue(found)),
            Ok(Err(err)) => {
                warn!(error = %format!("{err:#}"), "memory search failed");
                Ok(ControlFlow::Continue(Vec::new()))
            }
            Err(interrupted) => Ok(stop(interrupted)),
        }
    }

    async fn store_learning(
        &self,
        ctx: &CycleContext,
        learning: &Learning,
        recorder: &mut Recorder,
    ) -> Result<Flow<bool>> {
        self.store_memory(ctx, &learning.what, recorder, |embedding, now| {
            Memory::from_learning(learning, embedding, now)
        })
        .await
    }

    /// Embed `text`, build the memory, and store it.
    ///
    /// Continues with `false` when the store rejected the write.
    async fn store_memory(
        &self,
        ctx: &CycleContext,
        text: &str,
        recorder: &mut Recorder,
        build: impl FnOnce(Vec<f32>, DateTime<Utc>) -> Memory,
    ) -> Result<Flow<bool>> {
        let embedding = match ctx.run(self.deps.embedder.embed(text)).await {
            Ok(embedding) => embedding.context("embed memory")?,
            Err(interrupted) => return Ok(stop(interrupted)),
        };
        let memory = build(embedding, Utc::now());
        match ctx.run(self.deps.memory.store(memory)).await {
            Ok(Ok(id)) => {
                debug!(memory_id = %id, "memory stored");
                recorder.count_memory_stored();
                Ok(ControlFlow::Continue(true))
            }
            Ok(Err(err)) => {
                warn!(error = %format!("{err:#}"), "memory store failed");
                Ok(ControlFlow::Continue(false))
            }
            Err(interrupted) => Ok(stop(interrupted)),
        }
    }

    /// Dispatch limit for a tool; matches the age at which it is considered stale.
    fn tool_timeout(&self, tool: Tool) -> Duration {
        self.adaptive
            .stale_timeout(tool)
            .to_std()
            .unwrap_or(Duration::from_secs(MIN_TOOL_TIMEOUT_SECS))
    }
}

fn stop<T>(interrupted: Interrupted) -> Flow<T> {
    debug!(reason = %interrupted, "cycle interrupted");
    ControlFlow::Break(interrupted.stop_reason())
}

/// Stop when the context is done or the budget is spent.
fn checkpoint(ctx: &CycleContext, recorder: &Recorder) -> Flow {
    if let Err(interrupted) = ctx.check() {
        return stop(interrupted);
    }
    if recorder.budget().exhausted() {
        info!(
            tokens = recorder.budget().tokens_used(),
            thoughts = recorder.budget().thoughts(),
            "cycle budget exhausted"
        );
        return ControlFlow::Break(StopReason::MaxThoughts);
    }
    ControlFlow::Continue(())
}

/// Turn a proposal into a goal, or `None` when it is unusable.
fn goal_from_proposal(proposal: &GoalProposal, state: &InternalState, now: DateTime<Utc>) -> Option<Goal> {
    let description = proposal.description.trim();
    if description.is_empty() {
        return None;
    }
    if let Some(payload) = &proposal.self_mod {
        let slot_ok = (SELF_MOD_MIN_SLOT..=SELF_MOD_MAX_SLOT).contains(&payload.target_slot);
        if !slot_ok || payload.proposed_principle.trim().is_empty() {
            warn!(slot = payload.target_slot, "self-modification proposal rejected");
            return None;
        }
    }

    let priority = proposal.priority.clamp(1, 10) as u8;
    let mut goal = Goal::new(description, proposal.goal_source(), priority, now);
    goal.self_mod = proposal.self_mod.clone();

    let primaries = active_primaries(&state.active_goals);
    if proposal.wants_secondary() && !primaries.is_empty() {
        goal.tier = GoalTier::Secondary;
        if let Some(supports) = proposal.supports_goal_id.as_deref() {
            if primaries.iter().any(|primary| primary.id == supports) {
                goal.supports_goals.push(supports.to_string());
            }
        }
    }
    Some(goal)
}

/// The active mission when no goal has been derived from it yet.
///
/// Covers missions promoted outside a cycle as well as in-cycle promotions.
fn unseeded_mission(state: &InternalState) -> Option<Mission> {
    let mission = state.missions.active_mission.as_ref()?;
    let seeded = state
        .active_goals
        .iter()
        .chain(state.completed_goals.iter())
        .any(|goal| goal.mission_id.as_deref() == Some(mission.id.as_str()));
    (!seeded).then(|| mission.clone())
}

/// Close the active mission once every goal derived from it has finished.
fn settle_active_mission(state: &mut InternalState, now: DateTime<Utc>) {
    let Some(mission_id) = state
        .missions
        .active_mission
        .as_ref()
        .map(|mission| mission.id.clone())
    else {
        return;
    };
    if let Some(outcome) = mission_outcome(state, &mission_id) {
        state.missions.complete_active(outcome, now);
        info!(mission_id = %mission_id, outcome = outcome.as_str(), "mission closed");
    }
}
