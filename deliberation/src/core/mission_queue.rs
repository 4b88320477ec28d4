//! Ranked queue of user- and self-proposed missions.
//!
//! The queue keeps at most [`MISSION_QUEUE_CAP`] non-active missions sorted by
//! priority (descending). AI missions enter below the AI ceiling so they can
//! never outrank a user directive on insertion.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core::limits::{
    AI_PRIORITY_CEILING, MISSION_DECAY_INTERVAL_HOURS, MISSION_DECAY_STEP,
    MISSION_DROP_THRESHOLD, MISSION_DUPLICATE_BOOST, MISSION_QUEUE_CAP,
};
use crate::core::types::{Mission, MissionSource, MissionStatus, Outcome};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionQueue {
    pub active_mission: Option<Mission>,
    #[serde(default)]
    pub queued_missions: Vec<Mission>,
    #[serde(default)]
    pub completed_missions: Vec<Mission>,
}

/// What [`MissionQueue::enqueue`] did with a mission.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// Inserted as a new queue entry.
    Inserted { id: String, priority: f64 },
    /// An identical description was already queued; its priority was boosted.
    Boosted { id: String, priority: f64 },
    /// The description matches the active mission; nothing changed.
    AlreadyActive { id: String },
    /// The mission fell below the drop threshold or out of the capped queue.
    Dropped,
}

/// Summary of a decay pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecayReport {
    pub decayed: Vec<String>,
    pub dropped: Vec<String>,
}

impl MissionQueue {
    /// Insert a mission, boosting an existing entry with the same description.
    pub fn enqueue(&mut self, mut mission: Mission, now: DateTime<Utc>) -> EnqueueOutcome {
        let key = normalize(&mission.description);

        if let Some(existing) = self
            .queued_missions
            .iter_mut()
            .find(|queued| normalize(&queued.description) == key)
        {
            existing.priority = round_priority((existing.priority + MISSION_DUPLICATE_BOOST).min(1.0));
            existing.updated_at = now;
            let outcome = EnqueueOutcome::Boosted {
                id: existing.id.clone(),
                priority: existing.priority,
            };
            self.sort_queue();
            return outcome;
        }

        if let Some(active) = self
            .active_mission
            .as_ref()
            .filter(|active| normalize(&active.description) == key)
        {
            return EnqueueOutcome::AlreadyActive {
                id: active.id.clone(),
            };
        }

        let mut priority = mission.priority.clamp(0.0, 1.0);
        if mission.source == MissionSource::Ai {
            priority = priority.min(AI_PRIORITY_CEILING);
        }
        if priority <= MISSION_DROP_THRESHOLD {
            return EnqueueOutcome::Dropped;
        }
        mission.priority = round_priority(priority);
        mission.status = MissionStatus::Queued;
        mission.updated_at = now;
        let id = mission.id.clone();
        let priority = mission.priority;

        self.queued_missions.push(mission);
        self.sort_queue();
        self.queued_missions.truncate(MISSION_QUEUE_CAP);

        if self.queued_missions.iter().any(|queued| queued.id == id) {
            EnqueueOutcome::Inserted { id, priority }
        } else {
            EnqueueOutcome::Dropped
        }
    }

    /// Lower the priority of missions idle for a full decay interval.
    pub fn decay(&mut self, now: DateTime<Utc>) -> DecayReport {
        let mut report = DecayReport::default();
        let interval = Duration::hours(MISSION_DECAY_INTERVAL_HOURS);
        for mission in &mut self.queued_missions {
            if now - mission.updated_at >= interval {
                mission.priority = round_priority(mission.priority - MISSION_DECAY_STEP);
                mission.updated_at = now;
                report.decayed.push(mission.id.clone());
            }
        }
        self.queued_missions.retain(|mission| {
            let keep = mission.priority > MISSION_DROP_THRESHOLD;
            if !keep {
                report.dropped.push(mission.id.clone());
            }
            keep
        });
        report
    }

    /// Pop the highest-priority queued mission when nothing is active.
    ///
    /// Returns the newly promoted mission, or `None` when a mission was already
    /// active or the queue is empty.
    pub fn promote_active(&mut self, now: DateTime<Utc>) -> Option<&Mission> {
        if self.active_mission.is_some() || self.queued_missions.is_empty() {
            return None;
        }
        self.sort_queue();
        let mut mission = self.queued_missions.remove(0);
        mission.status = MissionStatus::Active;
        mission.updated_at = now;
        self.active_mission = Some(mission);
        self.active_mission.as_ref()
    }

    /// Close the active mission and move it to history.
    pub fn complete_active(&mut self, outcome: Outcome, now: DateTime<Utc>) -> Option<&Mission> {
        let mut mission = self.active_mission.take()?;
        mission.status = match outcome {
            Outcome::Good => MissionStatus::Completed,
            Outcome::Bad | Outcome::Neutral => MissionStatus::Abandoned,
        };
        mission.updated_at = now;
        self.completed_missions.push(mission);
        self.completed_missions.last()
    }

    /// Stable sort: priority descending, then oldest first.
    fn sort_queue(&mut self) {
        self.queued_missions.sort_by(|left, right| {
            right
                .priority
                .total_cmp(&left.priority)
                .then_with(|| left.created_at.cmp(&right.created_at))
        });
    }
}

fn normalize(description: &str) -> String {
    description.trim().to_lowercase()
}

/// Keep priorities at four decimals so repeated boosts and decays stay exact.
fn round_priority(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    fn mission(desc: &str, source: MissionSource, priority: f64) -> Mission {
        Mission::new(desc, source, priority, at())
    }

    /// Verifies the AI ceiling on insertion and the duplicate boost on re-insertion.
    #[test]
    fn ai_mission_is_capped_then_boosted() {
        let mut queue = MissionQueue::default();
        let first = queue.enqueue(mission("X", MissionSource::Ai, 0.95), at());
        assert!(matches!(first, EnqueueOutcome::Inserted { priority, .. } if priority == 0.79));

        let second = queue.enqueue(mission("X", MissionSource::Ai, 0.95), at());
        assert!(matches!(second, EnqueueOutcome::Boosted { priority, .. } if priority == 0.84));
        assert_eq!(queue.queued_missions.len(), 1);
        assert_eq!(queue.queued_missions[0].priority, 0.84);
    }

    #[test]
    fn user_mission_keeps_full_priority_and_boost_caps_at_one() {
        let mut queue = MissionQueue::default();
        queue.enqueue(mission("Ship it", MissionSource::User, 0.98), at());
        queue.enqueue(mission("ship it ", MissionSource::User, 0.5), at());
        assert_eq!(queue.queued_missions.len(), 1);
        assert_eq!(queue.queued_missions[0].priority, 1.0);
    }

    #[test]
    fn matching_active_mission_is_a_no_op() {
        let mut queue = MissionQueue::default();
        queue.enqueue(mission("Y", MissionSource::User, 0.6), at());
        queue.promote_active(at()).expect("promoted");

        let outcome = queue.enqueue(mission("Y", MissionSource::User, 0.6), at());
        assert!(matches!(outcome, EnqueueOutcome::AlreadyActive { .. }));
        assert!(queue.queued_missions.is_empty());
    }

    /// Ensures the queue never exceeds its cap and drops the lowest entry.
    #[test]
    fn queue_truncates_to_cap_dropping_lowest() {
        let mut queue = MissionQueue::default();
        for (idx, priority) in [0.5, 0.6, 0.7, 0.8, 0.9].iter().enumerate() {
            queue.enqueue(mission(&format!("m{idx}"), MissionSource::User, *priority), at());
        }
        let low = queue.enqueue(mission("low", MissionSource::User, 0.2), at());
        assert_eq!(low, EnqueueOutcome::Dropped);

        let high = queue.enqueue(mission("high", MissionSource::User, 0.95), at());
        assert!(matches!(high, EnqueueOutcome::Inserted { .. }));
        assert_eq!(queue.queued_missions.len(), MISSION_QUEUE_CAP);
        let priorities: Vec<f64> = queue.queued_missions.iter().map(|m| m.priority).collect();
        assert_eq!(priorities, vec![0.95, 0.9, 0.8, 0.7, 0.6]);
    }

    #[test]
    fn decay_only_touches_missions_idle_for_a_day() {
        let mut queue = MissionQueue::default();
        queue.enqueue(mission("old", MissionSource::User, 0.5), at());
        let later = at() + Duration::hours(12);
        queue.enqueue(mission("new", MissionSource::User, 0.4), later);

        let report = queue.decay(at() + Duration::hours(24));
        assert_eq!(report.decayed.len(), 1);
        let old = queue
            .queued_missions
            .iter()
            .find(|m| m.description == "old")
            .expect("old");
        assert_eq!(old.priority, 0.49);
        let new = queue
            .queued_missions
            .iter()
            .find(|m| m.description == "new")
            .expect("new");
        assert_eq!(new.priority, 0.4);
    }

    #[test]
    fn decay_drops_missions_at_threshold() {
        let mut queue = MissionQueue::default();
        queue.enqueue(mission("fading", MissionSource::Ai, 0.11), at());
        let report = queue.decay(at() + Duration::hours(25));
        assert_eq!(report.dropped.len(), 1);
        assert!(queue.queued_missions.is_empty());
    }

    #[test]
    fn promote_takes_highest_and_complete_moves_to_history() {
        let mut queue = MissionQueue::default();
        queue.enqueue(mission("a", MissionSource::User, 0.4), at());
        queue.enqueue(mission("b", MissionSource::User, 0.9), at());

        let promoted = queue.promote_active(at()).expect("promoted");
        assert_eq!(promoted.description, "b");
        assert_eq!(promoted.status, MissionStatus::Active);
        assert!(queue.promote_active(at()).is_none());

        let done = queue.complete_active(Outcome::Bad, at()).expect("completed");
        assert_eq!(done.status, MissionStatus::Abandoned);
        assert!(queue.active_mission.is_none());
        assert_eq!(queue.completed_missions.len(), 1);
    }
}
