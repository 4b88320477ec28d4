//! Per-cycle thresholds derived from recent performance.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::limits::{
    CONTINUITY_WINDOW_HOURS, PARSE_TIMEOUT_FLOOR_SECS, RECENT_GOAL_WINDOW, REPLAN_CAP,
};
use crate::core::types::{InternalState, Outcome, Tool};

pub const MIN_TOOL_TIMEOUT_SECS: u64 = 60;
pub const MAX_TOOL_TIMEOUT_SECS: u64 = 1800;

const STRUGGLING_SUCCESS_RATE: f64 = 0.3;
const THRIVING_SUCCESS_RATE: f64 = 0.7;
const REFLECTION_SEARCH_CEILING: f64 = 0.20;
const DUPLICATE_SIMILARITY_FLOOR: f64 = 0.70;
const DUPLICATE_SIMILARITY_CEILING: f64 = 0.80;

/// Base values the adaptive thresholds are derived from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdaptiveSettings {
    pub base_tool_timeout_secs: u64,
    pub base_search_threshold: f64,
    pub base_goal_similarity: f64,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            base_tool_timeout_secs: 300,
            base_search_threshold: 0.30,
            base_goal_similarity: 0.85,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveConfig {
    base: AdaptiveSettings,
    pub search_threshold: f64,
    pub goal_similarity_threshold: f64,
    pub tool_timeout_secs: u64,
    pub novelty_window_hours: i64,
    /// Share of good outcomes among recently finished goals.
    pub goal_success_rate: f64,
    pub total_memories: usize,
}

impl AdaptiveConfig {
    pub fn new(base: AdaptiveSettings) -> Self {
        let tool_timeout_secs = base
            .base_tool_timeout_secs
            .clamp(MIN_TOOL_TIMEOUT_SECS, MAX_TOOL_TIMEOUT_SECS);
        Self {
            search_threshold: base.base_search_threshold,
            goal_similarity_threshold: base.base_goal_similarity,
            tool_timeout_secs,
            novelty_window_hours: 12,
            goal_success_rate: 0.5,
            total_memories: 0,
            base,
        }
    }

    /// Recompute thresholds from the last finished goals and memory volume.
    ///
    /// The success rate keeps its previous value until a goal has finished.
    pub fn update_metrics(&mut self, state: &InternalState, total_memories: usize) {
        self.total_memories = total_memories;

        let recent = state.recent_completed(RECENT_GOAL_WINDOW);
        if !recent.is_empty() {
            let good = recent
                .iter()
                .filter(|goal| goal.outcome == Some(Outcome::Good))
                .count();
            self.goal_success_rate = good as f64 / recent.len() as f64;
        }

        let search_bump = match total_memories {
            n if n > 100_000 => 0.15,
            n if n > 10_000 => 0.10,
            n if n > 1_000 => 0.05,
            _ => 0.0,
        };
        self.search_threshold = self.base.base_search_threshold + search_bump;

        let base_timeout = self.base.base_tool_timeout_secs as f64;
        let (similarity, timeout, novelty) = if self.goal_success_rate < STRUGGLING_SUCCESS_RATE {
            (self.base.base_goal_similarity + 0.10, base_timeout * 2.0, 24)
        } else if self.goal_success_rate > THRIVING_SUCCESS_RATE {
            (self.base.base_goal_similarity - 0.10, base_timeout, 12)
        } else {
            (self.base.base_goal_similarity, base_timeout * 1.5, 12)
        };
        self.goal_similarity_threshold = similarity;
        self.tool_timeout_secs =
            (timeout.round() as u64).clamp(MIN_TOOL_TIMEOUT_SECS, MAX_TOOL_TIMEOUT_SECS);
        self.novelty_window_hours = novelty;

        debug!(
            search_threshold = self.search_threshold,
            goal_similarity = self.goal_similarity_threshold,
            tool_timeout_secs = self.tool_timeout_secs,
            goal_success_rate = self.goal_success_rate,
            total_memories,
            "adaptive thresholds updated"
        );
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::seconds(self.tool_timeout_secs as i64)
    }

    /// Age after which an in-progress action of `tool` counts as stale.
    pub fn stale_timeout(&self, tool: Tool) -> Duration {
        let base = self.tool_timeout();
        match tool {
            Tool::WebParseUnified => (base * 2).max(Duration::seconds(PARSE_TIMEOUT_FLOOR_SECS)),
            Tool::Search | Tool::Synthesis => base,
        }
    }

    /// Window during which a goal with pending work keeps the continuity lock.
    ///
    /// Never shorter than the longest stale timeout, so a slow parse cannot
    /// lose the lock while it is still considered in flight.
    pub fn continuity_window(&self) -> Duration {
        Duration::hours(CONTINUITY_WINDOW_HOURS).max(self.stale_timeout(Tool::WebParseUnified))
    }

    pub fn novelty_window(&self) -> Duration {
        Duration::hours(self.novelty_window_hours)
    }

    pub fn replan_ceiling(&self) -> u32 {
        REPLAN_CAP
    }

    /// Minimum score for the collective-memory search feeding reflection.
    pub fn reflection_search_threshold(&self) -> f64 {
        self.search_threshold.min(REFLECTION_SEARCH_CEILING)
    }

    /// Cosine similarity above which a proposed goal duplicates an existing one.
    pub fn duplicate_similarity_threshold(&self) -> f64 {
        self.goal_similarity_threshold
            .clamp(DUPLICATE_SIMILARITY_FLOOR, DUPLICATE_SIMILARITY_CEILING)
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self::new(AdaptiveSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Goal, GoalSource, GoalStatus};
    use chrono::{TimeZone, Utc};

    fn finished(outcome: Outcome) -> Goal {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut goal = Goal::new("g", GoalSource::Reflection, 5, now);
        goal.finish(GoalStatus::Completed, outcome);
        goal
    }

    fn state_with(outcomes: &[Outcome]) -> InternalState {
        InternalState {
            completed_goals: outcomes.iter().copied().map(finished).collect(),
            ..InternalState::default()
        }
    }

    #[test]
    fn neutral_history_uses_one_and_a_half_timeout() {
        let mut adaptive = AdaptiveConfig::default();
        adaptive.update_metrics(&InternalState::default(), 0);
        assert_eq!(adaptive.goal_success_rate, 0.5);
        assert_eq!(adaptive.tool_timeout_secs, 450);
        assert_eq!(adaptive.search_threshold, 0.30);
        assert_eq!(adaptive.goal_similarity_threshold, 0.85);
        assert_eq!(adaptive.novelty_window_hours, 12);
    }

    #[test]
    fn struggling_history_doubles_timeout_and_widens_novelty() {
        let mut adaptive = AdaptiveConfig::default();
        adaptive.update_metrics(&state_with(&[Outcome::Bad, Outcome::Bad, Outcome::Neutral]), 0);
        assert_eq!(adaptive.goal_success_rate, 0.0);
        assert_eq!(adaptive.tool_timeout_secs, 600);
        assert_eq!(adaptive.novelty_window_hours, 24);
        assert!((adaptive.goal_similarity_threshold - 0.95).abs() < 1e-9);
    }

    #[test]
    fn thriving_history_uses_base_timeout() {
        let mut adaptive = AdaptiveConfig::default();
        adaptive.update_metrics(&state_with(&[Outcome::Good; 4]), 0);
        assert_eq!(adaptive.tool_timeout_secs, 300);
        assert!((adaptive.goal_similarity_threshold - 0.75).abs() < 1e-9);
    }

    #[test]
    fn search_threshold_grows_with_memory_volume() {
        let mut adaptive = AdaptiveConfig::default();
        adaptive.update_metrics(&InternalState::default(), 1_001);
        assert!((adaptive.search_threshold - 0.35).abs() < 1e-9);
        adaptive.update_metrics(&InternalState::default(), 200_000);
        assert!((adaptive.search_threshold - 0.45).abs() < 1e-9);
        assert_eq!(adaptive.reflection_search_threshold(), 0.20);
    }

    /// Ensures the timeout stays inside its bounds for extreme bases.
    #[test]
    fn tool_timeout_is_clamped() {
        let mut adaptive = AdaptiveConfig::new(AdaptiveSettings {
            base_tool_timeout_secs: 1_500,
            ..AdaptiveSettings::default()
        });
        adaptive.update_metrics(&state_with(&[Outcome::Bad]), 0);
        assert_eq!(adaptive.tool_timeout_secs, MAX_TOOL_TIMEOUT_SECS);

        let mut adaptive = AdaptiveConfig::new(AdaptiveSettings {
            base_tool_timeout_secs: 10,
            ..AdaptiveSettings::default()
        });
        adaptive.update_metrics(&state_with(&[Outcome::Good]), 0);
        assert_eq!(adaptive.tool_timeout_secs, MIN_TOOL_TIMEOUT_SECS);
    }

    #[test]
    fn parse_timeout_and_continuity_window_have_floors() {
        let adaptive = AdaptiveConfig::new(AdaptiveSettings {
            base_tool_timeout_secs: 60,
            ..AdaptiveSettings::default()
        });
        assert_eq!(adaptive.stale_timeout(Tool::Search), Duration::seconds(60));
        assert_eq!(adaptive.stale_timeout(Tool::WebParseUnified), Duration::minutes(5));
        assert_eq!(adaptive.continuity_window(), Duration::hours(2));

        let mut slow = AdaptiveConfig::default();
        slow.tool_timeout_secs = MAX_TOOL_TIMEOUT_SECS;
        assert_eq!(slow.continuity_window(), Duration::hours(2));
        assert_eq!(slow.stale_timeout(Tool::WebParseUnified), Duration::hours(1));
    }
}
