//! Buffers a cycle's thoughts and counters until they are flushed to the store.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::budget::CycleBudget;
use crate::core::types::{CycleMetrics, StopReason, ThoughtRecord};
use crate::io::state_store::StateStore;

#[derive(Debug, Clone)]
pub struct Recorder {
    cycle_id: u64,
    start_time: DateTime<Utc>,
    budget: CycleBudget,
    thoughts: Vec<ThoughtRecord>,
    action_count: u32,
    goals_created: u32,
    goals_completed: u32,
    memories_stored: u32,
}

impl Recorder {
    pub fn new(cycle_id: u64, start_time: DateTime<Utc>, budget: CycleBudget) -> Self {
        Self {
            cycle_id,
            start_time,
            budget,
            thoughts: Vec::new(),
            action_count: 0,
            goals_created: 0,
            goals_completed: 0,
            memories_stored: 0,
        }
    }

    pub fn cycle_id(&self) -> u64 {
        self.cycle_id
    }

    pub fn budget(&self) -> &CycleBudget {
        &self.budget
    }

    /// Record a thought and charge its tokens; numbering starts at 1.
    pub fn record_thought(
        &mut self,
        content: impl Into<String>,
        tokens: u32,
        action_taken: bool,
        now: DateTime<Utc>,
    ) {
        self.budget.charge_tokens(tokens);
        self.budget.count_thought();
        let thought_num = self.thoughts.len() as u32 + 1;
        self.thoughts.push(ThoughtRecord {
            cycle_id: self.cycle_id,
            thought_num,
            content: content.into(),
            tokens_used: tokens,
            action_taken,
            timestamp: now,
        });
    }

    /// Charge tokens for a reasoner call that is not recorded as a thought.
    pub fn charge_tokens(&mut self, tokens: u32) {
        self.budget.charge_tokens(tokens);
    }

    pub fn count_action(&mut self) {
        self.action_count += 1;
    }

    pub fn count_goal_created(&mut self) {
        self.goals_created += 1;
    }

    pub fn add_goals_completed(&mut self, count: u32) {
        self.goals_completed += count;
    }

    pub fn count_memory_stored(&mut self) {
        self.memories_stored += 1;
    }

    pub fn thoughts(&self) -> &[ThoughtRecord] {
        &self.thoughts
    }

    pub fn metrics(&self, stop_reason: StopReason, end_time: DateTime<Utc>) -> CycleMetrics {
        CycleMetrics {
            cycle_id: self.cycle_id,
            start_time: self.start_time,
            end_time,
            duration_ms: (end_time - self.start_time).num_milliseconds(),
            thought_count: self.thoughts.len() as u32,
            action_count: self.action_count,
            tokens_used: self.budget.tokens_used(),
            goals_created: self.goals_created,
            goals_completed: self.goals_completed,
            memories_stored: self.memories_stored,
            stop_reason,
        }
    }

    /// Write buffered thoughts, then the cycle's metrics record.
    pub async fn flush(
        &self,
        store: &dyn StateStore,
        stop_reason: StopReason,
        end_time: DateTime<Utc>,
    ) -> Result<CycleMetrics> {
        for thought in &self.thoughts {
            store
                .save_thought(thought)
                .await
                .with_context(|| format!("save thought {}", thought.thought_num))?;
        }
        let metrics = self.metrics(stop_reason, end_time);
        store.save_metrics(&metrics).await.context("save metrics")?;
        debug!(
            cycle_id = self.cycle_id,
            thoughts = self.thoughts.len(),
            stop_reason = stop_reason.as_str(),
            "cycle audit flushed"
        );
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::invariants::validate_thought_sequence;
    use crate::test_support::InMemoryStateStore;
    use chrono::{Duration, TimeZone};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn thoughts_are_numbered_and_charged() {
        let mut recorder = Recorder::new(3, at(), CycleBudget::new(100, 8));
        recorder.record_thought("first", 40, false, at());
        recorder.charge_tokens(10);
        recorder.record_thought("second", 60, true, at());

        let nums: Vec<u32> = recorder.thoughts().iter().map(|t| t.thought_num).collect();
        assert_eq!(nums, vec![1, 2]);
        assert!(validate_thought_sequence(recorder.thoughts()).is_empty());
        assert_eq!(recorder.budget().tokens_used(), 110);
        assert!(recorder.budget().exhausted());
    }

    #[tokio::test]
    async fn flush_writes_thoughts_then_metrics() {
        let store = InMemoryStateStore::default();
        let mut recorder = Recorder::new(1, at(), CycleBudget::new(1000, 8));
        recorder.record_thought("reflect", 5, false, at());
        recorder.count_action();
        recorder.count_goal_created();

        let metrics = recorder
            .flush(&store, StopReason::NaturalStop, at() + Duration::seconds(2))
            .await
            .expect("flush");

        assert_eq!(metrics.duration_ms, 2000);
        assert_eq!(metrics.thought_count, 1);
        assert_eq!(metrics.action_count, 1);
        assert_eq!(metrics.goals_created, 1);
        assert_eq!(store.thoughts().len(), 1);
        assert_eq!(store.metrics(), vec![metrics]);
    }
}
